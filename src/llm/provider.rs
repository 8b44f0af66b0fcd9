use async_trait::async_trait;

use crate::errors::SidePilotResult;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse};

/// Unified LLM provider trait. New backends implement this and get an
/// `adapter` value in config.toml.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Identifier, matching the `[llm.providers.<id>]` key.
    fn name(&self) -> &str;

    /// Run one chat completion and return the full reply text.
    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> SidePilotResult<LlmResponse>;
}

/// Replace inline image payloads so request bodies can be logged.
pub fn sanitize_for_log(body: &serde_json::Value) -> String {
    let mut body = body.clone();
    scrub(&mut body);
    serde_json::to_string(&body).unwrap_or_default()
}

fn scrub(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) if s.starts_with("data:image/") => {
            *s = "<omitted_base64_image>".to_string();
        }
        serde_json::Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if key == "inlineData" || key == "inline_data" {
                    if let Some(data) = v.get_mut("data") {
                        *data = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                } else {
                    scrub(v);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(scrub),
        _ => {}
    }
}
