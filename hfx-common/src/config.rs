//! Configuration loading and default path resolution
//!
//! Priority order for every setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! Steps 1-2 are handled by the binary's CLI parser; this module owns the
//! TOML model and the compiled defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "HFX_CONFIG";

/// TOML configuration file model (`hfx-importer.toml`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// SQLite database file holding the import audit log
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub import: ImportConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_host")]
    pub host: String,
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_listen_host(),
            port: default_listen_port(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Bulk import tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Chunk length used when a start request does not name one
    #[serde(default = "default_chunk_days")]
    pub default_chunk_days: u32,

    /// Deadline for one protocol round trip, connect included
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Deadline for one liveness probe connect
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Liveness probe attempts while waiting for the remote to come back
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,

    /// Spacing between liveness probe attempts
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Protocol attempts per chunk before the chunk is skipped
    #[serde(default = "default_max_chunk_attempts")]
    pub max_chunk_attempts: u32,

    /// How long a start request waits for a cancelling job to finish
    #[serde(default = "default_conflict_grace_ms")]
    pub conflict_grace_ms: u64,

    /// Per-observer progress queue depth
    #[serde(default = "default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,

    /// User that fetched payloads are stored for when a request names none
    #[serde(default = "default_user")]
    pub default_user: String,

    /// Push-ingestion endpoint receiving each chunk's raw payload
    #[serde(default)]
    pub ingest_url: Option<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            default_chunk_days: default_chunk_days(),
            request_timeout_secs: default_request_timeout_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            probe_attempts: default_probe_attempts(),
            probe_interval_ms: default_probe_interval_ms(),
            max_chunk_attempts: default_max_chunk_attempts(),
            conflict_grace_ms: default_conflict_grace_ms(),
            subscriber_queue_capacity: default_subscriber_queue_capacity(),
            default_user: default_user(),
            ingest_url: None,
        }
    }
}

impl ImportConfig {
    /// Reject settings that would make the importer stall or never retry
    pub fn validate(&self) -> Result<()> {
        if self.default_chunk_days == 0 {
            return Err(Error::Config("import.default_chunk_days must be at least 1".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("import.request_timeout_secs must be at least 1".to_string()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(Error::Config("import.probe_timeout_ms must be at least 1".to_string()));
        }
        if self.max_chunk_attempts == 0 {
            return Err(Error::Config("import.max_chunk_attempts must be at least 1".to_string()));
        }
        if self.subscriber_queue_capacity == 0 {
            return Err(Error::Config(
                "import.subscriber_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.default_user.trim().is_empty() {
            return Err(Error::Config("import.default_user must not be empty".to_string()));
        }
        Ok(())
    }
}

fn default_listen_host() -> String {
    "127.0.0.1".to_string()
}

fn default_listen_port() -> u16 {
    5780
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_chunk_days() -> u32 {
    7
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_probe_attempts() -> u32 {
    30
}

fn default_probe_interval_ms() -> u64 {
    2000
}

fn default_max_chunk_attempts() -> u32 {
    3
}

fn default_conflict_grace_ms() -> u64 {
    5000
}

fn default_subscriber_queue_capacity() -> usize {
    64
}

fn default_user() -> String {
    "default".to_string()
}

/// Resolve which config file to read
///
/// Explicit path (CLI) → `HFX_CONFIG` → `<config dir>/hfx/hfx-importer.toml`.
/// Returns None when no platform config directory exists.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir().map(|d| d.join("hfx").join("hfx-importer.toml"))
}

/// Load the TOML config file
///
/// A missing file is not an error: a warning is logged and defaults are used.
/// A file that exists but does not parse is a configuration error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write a config file, creating parent directories as needed
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// OS-dependent default location of the audit database
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("hfx").join("hfx.db"))
        .unwrap_or_else(|| PathBuf::from("./hfx_data/hfx.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_config_defaults() {
        let config = ImportConfig::default();
        assert_eq!(config.default_chunk_days, 7);
        assert_eq!(config.max_chunk_attempts, 3);
        assert_eq!(config.default_user, "default");
        assert!(config.ingest_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            [import]
            default_chunk_days = 14
            "#,
        )
        .unwrap();

        assert_eq!(config.import.default_chunk_days, 14);
        assert_eq!(config.import.probe_attempts, 30);
        assert_eq!(config.server.port, 5780);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = ImportConfig {
            max_chunk_attempts: 0,
            ..ImportConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_queue_capacity() {
        let config = ImportConfig {
            subscriber_queue_capacity: 0,
            ..ImportConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
