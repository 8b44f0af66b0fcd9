use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::{SidePilotError, SidePilotResult};
use crate::llm::provider::{sanitize_for_log, LlmProvider};
use crate::llm::types::{CallConfig, ChatMessage, ContentPart, LlmResponse, MessageContent};

/// Google Gemini `generateContent` backend.
pub struct GeminiProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

fn to_parts(content: &MessageContent) -> Vec<Value> {
    match content {
        MessageContent::Text(text) => vec![json!({ "text": text })],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => json!({ "text": text }),
                ContentPart::ImageUrl { image_url } => match image_url.as_inline_data() {
                    Some((mime, data)) => json!({ "inlineData": { "mimeType": mime, "data": data } }),
                    None => json!({ "text": format!("[image: {}]", image_url.url) }),
                },
            })
            .collect(),
    }
}

/// System messages become `systemInstruction`; assistant turns use role `model`.
fn build_request(messages: &[ChatMessage], cfg: &CallConfig) -> Value {
    let mut system = Vec::new();
    let mut contents = Vec::new();
    for msg in messages {
        if msg.role == "system" {
            system.extend(to_parts(&msg.content));
            continue;
        }
        let role = if msg.role == "assistant" { "model" } else { "user" };
        contents.push(json!({ "role": role, "parts": to_parts(&msg.content) }));
    }

    let mut body = json!({
        "contents": contents,
        "generationConfig": {
            "temperature": cfg.temperature,
            "topK": 40,
            "topP": 0.95,
            "maxOutputTokens": 8192,
            "responseMimeType": "text/plain",
        },
    });
    if !system.is_empty() {
        body["systemInstruction"] = json!({ "role": "user", "parts": system });
    }
    body
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> SidePilotResult<LlmResponse> {
        let body = build_request(&messages, cfg);
        let url = format!("{}/models/{}:generateContent", self.api_base, cfg.model);

        tracing::debug!(provider = %self.id, model = %cfg.model, "sending Gemini request");
        tracing::trace!(body = %sanitize_for_log(&body), "request body (sanitized, base64 omitted)");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(SidePilotError::Gateway(format!("{}: {status}: {err_body}", self.id)));
        }

        let json: Value = response.json().await?;
        let parts = json["candidates"][0]["content"]["parts"]
            .as_array()
            .ok_or_else(|| {
                SidePilotError::Gateway(format!("{}: unexpected response structure", self.id))
            })?;

        let mut out = LlmResponse::default();
        for part in parts {
            let Some(text) = part["text"].as_str() else { continue };
            if part["thought"].as_bool().unwrap_or(false) {
                out.reasoning.push_str(text);
            } else {
                out.content.push_str(text);
            }
        }

        tracing::info!(provider = %self.id, content_len = out.content.len(), "Gemini response received");
        Ok(out)
    }
}
