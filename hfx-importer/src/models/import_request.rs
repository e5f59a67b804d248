//! Validated import request
//!
//! Dates are checked and normalized here, before any background task exists.

use chrono::{Duration, NaiveDate, NaiveTime};
use hfx_common::events::ChunkWindow;
use hfx_common::{Error, Result};
use serde::Serialize;

/// Longest accepted chunk
pub const MAX_CHUNK_DAYS: u32 = 366;

/// Longest accepted import window, in days (20 years)
pub const MAX_WINDOW_DAYS: i64 = 20 * 366;

/// Date format accepted for start/end dates
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A start request that passed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRequest {
    pub host: String,
    pub port: u16,
    /// `[start 00:00, day after end 00:00)`
    pub window: ChunkWindow,
    pub chunk_days: u32,
    pub dry_run: bool,
    /// User the ingested records belong to
    pub user: String,
}

impl ImportRequest {
    /// Validate raw inputs
    ///
    /// `end_date` is inclusive: the window is extended to the exclusive
    /// midnight after it so the final chunk covers the whole last day.
    pub fn new(
        host: &str,
        port: u16,
        start_date: &str,
        end_date: &str,
        chunk_days: u32,
        dry_run: bool,
        user: &str,
    ) -> Result<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(Error::InvalidInput("host must not be empty".to_string()));
        }
        if port == 0 {
            return Err(Error::InvalidInput("port must be non-zero".to_string()));
        }
        if chunk_days == 0 || chunk_days > MAX_CHUNK_DAYS {
            return Err(Error::InvalidInput(format!(
                "chunk_days must be between 1 and {}, got {}",
                MAX_CHUNK_DAYS, chunk_days
            )));
        }
        let user = user.trim();
        if user.is_empty() {
            return Err(Error::InvalidInput("user must not be empty".to_string()));
        }

        let start = parse_date("start_date", start_date)?;
        let end = parse_date("end_date", end_date)?;
        if end < start {
            return Err(Error::InvalidInput(format!(
                "end_date {} is before start_date {}",
                end, start
            )));
        }
        let days = (end - start).num_days() + 1;
        if days > MAX_WINDOW_DAYS {
            return Err(Error::InvalidInput(format!(
                "window of {} days exceeds the maximum of {} days",
                days, MAX_WINDOW_DAYS
            )));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            window: normalize_window(start, end)?,
            chunk_days,
            dry_run,
            user: user.to_string(),
        })
    }

    pub fn chunk_length(&self) -> Duration {
        Duration::days(i64::from(self.chunk_days))
    }

    /// `host:port` of the device service
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|e| {
        Error::InvalidInput(format!(
            "{} '{}' is not a valid YYYY-MM-DD date: {}",
            field, value, e
        ))
    })
}

/// Inclusive calendar dates → exclusive end-of-day window
///
/// Fails when the day after `end` is past the last representable date.
pub fn normalize_window(start: NaiveDate, end: NaiveDate) -> Result<ChunkWindow> {
    let after_end = end.succ_opt().ok_or_else(|| {
        Error::InvalidInput(format!("end_date {} is out of range", end))
    })?;
    Ok(ChunkWindow::new(
        start.and_time(NaiveTime::MIN),
        after_end.and_time(NaiveTime::MIN),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: &str, end: &str) -> Result<ImportRequest> {
        ImportRequest::new("10.0.0.5", 9000, start, end, 7, false, "alice")
    }

    #[test]
    fn test_end_date_is_normalized_to_exclusive_midnight() {
        let req = request("2025-01-01", "2025-01-09").unwrap();
        assert_eq!(req.window.start.to_string(), "2025-01-01 00:00:00");
        assert_eq!(req.window.end.to_string(), "2025-01-10 00:00:00");
    }

    #[test]
    fn test_single_day_window() {
        let req = request("2025-03-04", "2025-03-04").unwrap();
        assert_eq!(req.window.duration(), Duration::days(1));
    }

    #[test]
    fn test_malformed_dates_rejected() {
        assert!(matches!(request("2025-13-01", "2025-01-02"), Err(Error::InvalidInput(_))));
        assert!(matches!(request("yesterday", "2025-01-02"), Err(Error::InvalidInput(_))));
        assert!(matches!(request("2025-01-01", "2025/01/02"), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_reversed_range_rejected() {
        let err = request("2025-02-01", "2025-01-01").unwrap_err();
        assert!(err.to_string().contains("before"));
    }

    #[test]
    fn test_last_representable_date_rejected() {
        let last = NaiveDate::MAX.format(DATE_FORMAT).to_string();
        let err = request(&last, &last).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(ref msg) if msg.contains("out of range")), "{err}");
        assert!(normalize_window(NaiveDate::MAX, NaiveDate::MAX).is_err());
    }

    #[test]
    fn test_window_length_bounded() {
        let last = NaiveDate::MAX.format(DATE_FORMAT).to_string();
        let err = ImportRequest::new("h", 1, "2025-01-01", &last, 1, false, "u").unwrap_err();
        assert!(err.to_string().contains("exceeds"), "{err}");

        assert!(request("2000-01-01", "2019-12-31").is_ok());
        assert!(request("2000-01-01", "2030-01-01").is_err());
    }

    #[test]
    fn test_chunk_days_bounds() {
        assert!(ImportRequest::new("h", 1, "2025-01-01", "2025-01-02", 0, false, "u").is_err());
        assert!(ImportRequest::new("h", 1, "2025-01-01", "2025-01-02", 367, false, "u").is_err());
        assert!(ImportRequest::new("h", 1, "2025-01-01", "2025-01-02", 366, false, "u").is_ok());
    }

    #[test]
    fn test_empty_host_and_zero_port_rejected() {
        assert!(ImportRequest::new("  ", 9000, "2025-01-01", "2025-01-02", 7, false, "u").is_err());
        assert!(ImportRequest::new("h", 0, "2025-01-01", "2025-01-02", 7, false, "u").is_err());
    }

    #[test]
    fn test_address_formatting() {
        let req = request("2025-01-01", "2025-01-02").unwrap();
        assert_eq!(req.address(), "10.0.0.5:9000");
        assert_eq!(req.chunk_length(), Duration::days(7));
    }
}
