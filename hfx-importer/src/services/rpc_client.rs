//! Device RPC client
//!
//! Single-shot client for the newline-framed JSON-RPC 2.0 service running on
//! the device: one connection, one request, one response. The device closes
//! the connection after responding, so the response is everything read until
//! EOF.
//!
//! The client never retries. Retry and recovery policy belongs to the
//! import orchestrator, which uses [`RpcClient::wait_until_reachable`] to
//! wait out a device restart.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::models::ProbePolicy;

/// Tool returning health metric samples or aggregates
pub const TOOL_HEALTH_METRICS: &str = "health_metrics";
/// Tool returning workouts
pub const TOOL_WORKOUTS: &str = "workouts";

/// JSON-RPC method used to invoke a tool
const METHOD_TOOLS_CALL: &str = "tools/call";

/// Keys searched (in order) for the record array of an object payload
const RECORD_ARRAY_KEYS: &[&str] = &["data", "samples", "metrics", "workouts"];

/// Protocol client failure
#[derive(Debug, Error)]
pub enum RpcError {
    /// Remote unreachable or the connection broke mid-exchange
    #[error("connection to {addr} failed: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The round trip did not finish within the request deadline
    #[error("request to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    /// Malformed or empty response
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Structured JSON-RPC error object returned by the device
    #[error("device returned error {code}: {message}")]
    Application { code: i64, message: String },
}

impl RpcError {
    /// Short classification for logs
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Connection { .. } => "connection",
            RpcError::Timeout { .. } => "timeout",
            RpcError::Protocol(_) => "protocol",
            RpcError::Application { .. } => "application",
        }
    }

    /// Whether the orchestrator should wait for recovery and retry
    ///
    /// Application errors are retried too: the device restarts mid-session
    /// and its error responses during that window are usually transient.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: ToolParams<'a>,
}

#[derive(Debug, Serialize)]
struct ToolParams<'a> {
    name: &'a str,
    arguments: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Successful tool response
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Exact bytes of the `result` member; None when it was JSON `null`
    payload: Option<Vec<u8>>,
    /// Bytes read from the socket for this response
    bytes_read: usize,
}

impl ToolResult {
    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// True when the device answered with JSON `null`
    pub fn is_null(&self) -> bool {
        self.payload.is_none()
    }

    /// Number of records carried by the payload
    ///
    /// Arrays count their elements; objects count the first record array
    /// found under a known key, or 1 if they have content but no such array.
    /// `null`, `[]` and `{}` count 0.
    pub fn record_count(&self) -> u64 {
        let Some(payload) = self.payload.as_deref() else {
            return 0;
        };
        match serde_json::from_slice::<Value>(payload) {
            Ok(value) => count_records(&value),
            Err(_) => 0,
        }
    }
}

fn count_records(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::Array(items) => items.len() as u64,
        Value::Object(fields) => {
            if fields.is_empty() {
                return 0;
            }
            RECORD_ARRAY_KEYS
                .iter()
                .find_map(|key| fields.get(*key).and_then(Value::as_array))
                .map(|items| items.len() as u64)
                .unwrap_or(1)
        }
        _ => 1,
    }
}

/// Client bound to one device address
#[derive(Debug)]
pub struct RpcClient {
    addr: String,
    request_timeout: Duration,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(host: &str, port: u16, request_timeout: Duration) -> Self {
        Self {
            addr: format!("{}:{}", host, port),
            request_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Call a device tool
    ///
    /// The deadline covers connect, write and read.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolResult, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method: METHOD_TOOLS_CALL,
            params: ToolParams {
                name: tool,
                arguments,
            },
        };
        let mut frame = serde_json::to_vec(&request)
            .map_err(|e| RpcError::Protocol(format!("failed to encode request: {}", e)))?;
        frame.push(b'\n');

        debug!(addr = %self.addr, tool, id, "Sending device request");

        let response = tokio::time::timeout(self.request_timeout, self.round_trip(&frame))
            .await
            .map_err(|_| RpcError::Timeout {
                addr: self.addr.clone(),
                timeout: self.request_timeout,
            })??;

        let result = parse_response(&response, id)?;
        debug!(
            addr = %self.addr,
            tool,
            id,
            bytes = result.bytes_read,
            null = result.is_null(),
            "Device response received"
        );
        Ok(result)
    }

    async fn round_trip(&self, frame: &[u8]) -> Result<Vec<u8>, RpcError> {
        let connection_error = |source| RpcError::Connection {
            addr: self.addr.clone(),
            source,
        };

        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(connection_error)?;
        stream.write_all(frame).await.map_err(connection_error)?;
        stream.flush().await.map_err(connection_error)?;

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .await
            .map_err(connection_error)?;

        if response.is_empty() {
            return Err(RpcError::Protocol(
                "device closed the connection without responding".to_string(),
            ));
        }
        Ok(response)
    }

    /// Liveness probe: repeatedly try a bare connect until one succeeds
    ///
    /// Returns true as soon as the device accepts a connection, false after
    /// `policy.attempts` failed attempts.
    pub async fn wait_until_reachable(&self, policy: &ProbePolicy) -> bool {
        for attempt in 1..=policy.attempts {
            match tokio::time::timeout(policy.timeout, TcpStream::connect(&self.addr)).await {
                Ok(Ok(_)) => {
                    if attempt > 1 {
                        info!(addr = %self.addr, attempt, "Device reachable again");
                    }
                    return true;
                }
                Ok(Err(e)) => {
                    debug!(addr = %self.addr, attempt, error = %e, "Liveness probe failed");
                }
                Err(_) => {
                    debug!(addr = %self.addr, attempt, "Liveness probe timed out");
                }
            }
            if attempt < policy.attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }
        false
    }
}

fn parse_response(bytes: &[u8], expected_id: u64) -> Result<ToolResult, RpcError> {
    let fields: HashMap<String, Box<RawValue>> = serde_json::from_slice(bytes)
        .map_err(|e| RpcError::Protocol(format!("response is not a JSON object: {}", e)))?;

    if let Some(id) = fields.get("id") {
        let id: Value = serde_json::from_str(id.get())
            .map_err(|e| RpcError::Protocol(format!("invalid response id: {}", e)))?;
        if !id.is_null() && id.as_u64() != Some(expected_id) {
            return Err(RpcError::Protocol(format!(
                "response id {} does not match request id {}",
                id, expected_id
            )));
        }
    }

    if let Some(error) = fields.get("error") {
        if error.get().trim() != "null" {
            let error: RpcErrorObject = serde_json::from_str(error.get())
                .map_err(|e| RpcError::Protocol(format!("malformed error object: {}", e)))?;
            return Err(RpcError::Application {
                code: error.code,
                message: error.message,
            });
        }
    }

    let result = fields.get("result").ok_or_else(|| {
        RpcError::Protocol("response has neither result nor error".to_string())
    })?;
    let raw = result.get().trim();
    let payload = if raw == "null" {
        None
    } else {
        Some(raw.as_bytes().to_vec())
    };

    Ok(ToolResult {
        payload,
        bytes_read: bytes.len(),
    })
}
