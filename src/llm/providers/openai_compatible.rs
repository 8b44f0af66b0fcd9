use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{SidePilotError, SidePilotResult};
use crate::llm::provider::{sanitize_for_log, LlmProvider};
use crate::llm::sse_parser;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, StreamChunkKind};

pub struct OpenAiCompatibleProvider {
    id: String,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            endpoint: chat_endpoint(&api_base),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

/// Accept either a base URL (`https://api.openai.com/v1`) or the full
/// completions endpoint.
fn chat_endpoint(api_base: &str) -> String {
    let base = api_base.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> SidePilotResult<LlmResponse> {
        let body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
        });

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            messages = messages.len(),
            "sending LLM request"
        );
        tracing::trace!(body = %sanitize_for_log(&body), "request body (sanitized, base64 omitted)");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(SidePilotError::Gateway(format!("{}: {status}: {err_body}", self.id)));
        }

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Accumulate an SSE stream into one response.
    async fn handle_stream(&self, response: reqwest::Response) -> SidePilotResult<LlmResponse> {
        let mut byte_stream = response.bytes_stream();
        // Bytes, not text: a UTF-8 sequence may straddle two chunks.
        let mut line_buf: Vec<u8> = Vec::new();
        let mut out = LlmResponse::default();

        'stream: while let Some(result) = byte_stream.next().await {
            let bytes = result?;
            line_buf.extend_from_slice(&bytes);

            while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = line_buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw);
                match sse_parser::parse_sse_line(line.trim()) {
                    Ok(Some(chunk)) => match chunk.kind {
                        StreamChunkKind::Reasoning => out.reasoning.push_str(&chunk.content),
                        StreamChunkKind::Content => out.content.push_str(&chunk.content),
                        StreamChunkKind::Done => break 'stream,
                    },
                    Ok(None) => {}
                    Err(e) => tracing::debug!("SSE parse skipped: {e}"),
                }
            }
        }

        tracing::info!(
            provider = %self.id,
            content_len = out.content.len(),
            reasoning_len = out.reasoning.len(),
            "LLM stream complete"
        );
        Ok(out)
    }

    async fn handle_json(&self, response: reqwest::Response) -> SidePilotResult<LlmResponse> {
        let json: serde_json::Value = response.json().await?;

        let message = &json["choices"][0]["message"];
        let Some(content) = message["content"].as_str() else {
            return Err(SidePilotError::Gateway(format!(
                "{}: response carried no message content",
                self.id
            )));
        };
        let reasoning = message["reasoning_content"].as_str().unwrap_or_default();

        tracing::info!(provider = %self.id, content_len = content.len(), "LLM JSON response received");
        Ok(LlmResponse {
            content: content.to_string(),
            reasoning: reasoning.to_string(),
        })
    }
}
