//! JSON-RPC client for a Chrome DevTools WebSocket endpoint.
//!
//! Commands get auto-incrementing ids and their responses are routed back to
//! the caller through a oneshot channel. Protocol events are not consumed by
//! the agent and are dropped by the reader task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::errors::{SidePilotError, SidePilotResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<CdpResponse>>>>;

#[derive(Debug, Clone, serde::Serialize)]
struct CdpCommand<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Clone)]
pub struct CdpResponse {
    pub id: u64,
    pub result: Option<Value>,
    pub error: Option<CdpResponseError>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CdpResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

pub struct CdpClient {
    next_id: AtomicU64,
    pending: PendingMap,
    writer: Mutex<WsSink>,
    timeout: Duration,
    reader: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to `ws://host:port/devtools/page/<target>`.
    pub async fn connect(ws_url: &str, timeout: Duration) -> SidePilotResult<Self> {
        tracing::info!(url = ws_url, "connecting to DevTools WebSocket");

        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| SidePilotError::Session(format!("cannot reach {ws_url}: {e}")))?;

        let (writer, reader) = ws_stream.split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            read_loop(reader, reader_pending).await;
        });

        Ok(Self {
            next_id: AtomicU64::new(1),
            pending,
            writer: Mutex::new(writer),
            timeout,
            reader,
        })
    }

    pub async fn send(&self, method: &str, params: Value) -> SidePilotResult<Value> {
        self.send_with_timeout(method, params, self.timeout).await
    }

    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> SidePilotResult<Value> {
        if self.reader.is_finished() {
            return Err(SidePilotError::Session("DevTools connection closed".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let json = serde_json::to_string(&CdpCommand { id, method, params })?;

        // Register before sending so a fast response cannot be missed.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        tracing::trace!(id, method, "sending CDP command");
        let sent = {
            let mut writer = self.writer.lock().await;
            writer.send(Message::Text(json.into())).await
        };
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(SidePilotError::Session(format!("failed to send {method}: {e}")));
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                return Err(SidePilotError::Session(
                    "response channel closed unexpectedly".into(),
                ))
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(SidePilotError::Timeout {
                    method: method.to_string(),
                    duration: timeout,
                });
            }
        };

        if let Some(err) = response.error {
            if err.code == CONNECTION_CLOSED {
                return Err(SidePilotError::Session(err.message));
            }
            return Err(SidePilotError::Cdp {
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    pub async fn enable_domain(&self, domain: &str) -> SidePilotResult<()> {
        self.send(&format!("{domain}.enable"), serde_json::json!({})).await?;
        Ok(())
    }

    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "close frame not delivered");
        }
        self.reader.abort();
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

const CONNECTION_CLOSED: i64 = -1;

async fn read_loop(mut reader: SplitStream<WsStream>, pending: PendingMap) {
    while let Some(msg) = reader.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.as_str().to_owned(),
            Ok(Message::Binary(b)) => match String::from_utf8(b.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => {
                tracing::info!("DevTools WebSocket closed by remote");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "WebSocket read error, stopping reader");
                break;
            }
        };

        let json: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse CDP message as JSON");
                continue;
            }
        };

        if let Some(response) = parse_cdp_response(&json) {
            match pending.lock().await.remove(&response.id) {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => tracing::debug!(id = response.id, "response for unknown command id"),
            }
        }
    }

    // Fail every command still waiting so callers see the disconnect.
    let mut guard = pending.lock().await;
    for (id, tx) in guard.drain() {
        let _ = tx.send(CdpResponse {
            id,
            result: None,
            error: Some(CdpResponseError {
                code: CONNECTION_CLOSED,
                message: "DevTools connection closed".to_string(),
                data: None,
            }),
        });
    }
}

/// Parse a CDP frame into a response. Event frames (no `id`) yield `None`.
pub fn parse_cdp_response(json: &Value) -> Option<CdpResponse> {
    let id = json.get("id")?.as_u64()?;
    Some(CdpResponse {
        id,
        result: json.get("result").cloned(),
        error: json
            .get("error")
            .and_then(|e| serde_json::from_value(e.clone()).ok()),
    })
}

/// Pull `result.value` out of a `Runtime.evaluate` / `Runtime.callFunctionOn`
/// reply, surfacing script exceptions as errors.
pub fn remote_value(reply: &Value) -> SidePilotResult<Value> {
    if let Some(details) = reply.get("exceptionDetails") {
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .or_else(|| details.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or("script evaluation failed");
        return Err(SidePilotError::Executor(text.to_string()));
    }
    Ok(reply
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success_response() {
        let json = serde_json::json!({
            "id": 1,
            "result": { "frameId": "abc123", "loaderId": "def456" }
        });
        let resp = parse_cdp_response(&json).unwrap();
        assert_eq!(resp.id, 1);
        assert!(resp.error.is_none());
        assert_eq!(resp.result.unwrap()["frameId"], "abc123");
    }

    #[test]
    fn parses_error_response() {
        let json = serde_json::json!({
            "id": 2,
            "error": { "code": -32000, "message": "No node with given id found" }
        });
        let resp = parse_cdp_response(&json).unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "No node with given id found");
        assert!(err.data.is_none());
    }

    #[test]
    fn events_are_not_responses() {
        let json = serde_json::json!({
            "method": "Page.loadEventFired",
            "params": { "timestamp": 1.5 }
        });
        assert!(parse_cdp_response(&json).is_none());
    }

    #[test]
    fn remote_value_reads_result_value() {
        let reply = serde_json::json!({ "result": { "type": "string", "value": "complete" } });
        assert_eq!(remote_value(&reply).unwrap(), "complete");
    }

    #[test]
    fn remote_value_surfaces_exceptions() {
        let reply = serde_json::json!({
            "result": { "type": "object" },
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": { "description": "TypeError: el is null" }
            }
        });
        let err = remote_value(&reply).unwrap_err();
        assert!(err.to_string().contains("TypeError: el is null"));
    }
}
