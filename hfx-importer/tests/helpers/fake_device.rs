//! Scripted stand-in for the device RPC service
//!
//! Listens on 127.0.0.1:0, answers each newline-framed request according to
//! a script and records every request it saw. Bare connects (liveness
//! probes) are accepted and not recorded.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A request the device received
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub id: Value,
    pub tool: String,
    pub arguments: Value,
}

impl RecordedCall {
    pub fn metric(&self) -> Option<&str> {
        self.arguments.get("metric").and_then(Value::as_str)
    }

    pub fn start(&self) -> &str {
        self.arguments["start"].as_str().unwrap_or_default()
    }
}

/// How the device answers one request
#[derive(Debug, Clone)]
pub enum Reply {
    /// `{"result": value}`
    Result(Value),
    /// `{"error": {code, message}}`
    Error { code: i64, message: String },
    /// Close the connection without writing anything
    Empty,
    /// Wait, then answer with `result`
    Delayed(Duration, Value),
}

impl Reply {
    pub fn records(count: usize) -> Self {
        Reply::Result(Value::Array((0..count).map(|i| json!({ "v": i })).collect()))
    }

    pub fn null() -> Self {
        Reply::Result(Value::Null)
    }

    pub fn error(message: &str) -> Self {
        Reply::Error {
            code: -32000,
            message: message.to_string(),
        }
    }
}

type Script = dyn Fn(&RecordedCall, usize) -> Reply + Send + Sync;

pub struct FakeDevice {
    pub port: u16,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    handle: JoinHandle<()>,
}

impl FakeDevice {
    /// Start a device answering with `script(call, call_index)`
    pub async fn start<F>(script: F) -> Self
    where
        F: Fn(&RecordedCall, usize) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let script: Arc<Script> = Arc::new(script);

        let handle = {
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        return;
                    };
                    let calls = Arc::clone(&calls);
                    let script = Arc::clone(&script);
                    tokio::spawn(async move {
                        let mut reader = BufReader::new(socket);
                        let mut line = String::new();
                        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                            return; // liveness probe
                        }
                        let Ok(request) = serde_json::from_str::<Value>(&line) else {
                            return;
                        };
                        let call = RecordedCall {
                            id: request["id"].clone(),
                            tool: request["params"]["name"].as_str().unwrap_or_default().to_string(),
                            arguments: request["params"]["arguments"].clone(),
                        };
                        let index = {
                            let mut calls = calls.lock().unwrap();
                            calls.push(call.clone());
                            calls.len() - 1
                        };

                        let body = match script(&call, index) {
                            Reply::Result(result) => Some(json!({
                                "jsonrpc": "2.0", "id": call.id, "result": result
                            })),
                            Reply::Error { code, message } => Some(json!({
                                "jsonrpc": "2.0", "id": call.id,
                                "error": { "code": code, "message": message }
                            })),
                            Reply::Empty => None,
                            Reply::Delayed(delay, result) => {
                                tokio::time::sleep(delay).await;
                                Some(json!({ "jsonrpc": "2.0", "id": call.id, "result": result }))
                            }
                        };

                        let mut socket = reader.into_inner();
                        if let Some(body) = body {
                            let mut frame = serde_json::to_vec(&body).unwrap();
                            frame.push(b'\n');
                            let _ = socket.write_all(&frame).await;
                        }
                        let _ = socket.shutdown().await;
                    });
                }
            })
        };

        Self { port, calls, handle }
    }

    /// Device that answers every request with the same reply
    pub async fn always(reply: Reply) -> Self {
        Self::start(move |_, _| reply.clone()).await
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A port nothing is listening on
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}
