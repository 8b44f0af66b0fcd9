use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SidePilotError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model gateway error: {0}")]
    Gateway(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("CDP error {code}: {message}")]
    Cdp { code: i64, message: String },

    #[error("Timed out after {duration:?} waiting for {method}")]
    Timeout { method: String, duration: Duration },

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Unsupported document: {0}")]
    UnsupportedDocument(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Turn cancelled")]
    Cancelled,
}

impl SidePilotError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SidePilotError::Cancelled)
    }
}

impl serde::Serialize for SidePilotError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

pub type SidePilotResult<T> = Result<T, SidePilotError>;
