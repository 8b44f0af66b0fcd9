use crate::errors::{SidePilotError, SidePilotResult};
use crate::llm::types::{StreamChunk, StreamChunkKind};

/// Parses a raw SSE line (OpenAI-compatible format) into a StreamChunk.
/// Returns None for keep-alives, comments and empty deltas.
pub fn parse_sse_line(line: &str) -> SidePilotResult<Option<StreamChunk>> {
    if line.is_empty() || line.starts_with(':') {
        return Ok(None);
    }

    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Ok(None);
    };

    if data == "[DONE]" {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Done,
            content: String::new(),
        }));
    }

    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| SidePilotError::Gateway(format!("bad SSE payload: {e}")))?;

    let Some(first) = json["choices"].as_array().and_then(|c| c.first()) else {
        return Ok(None);
    };
    let delta = &first["delta"];

    // Some models (e.g. DeepSeek) stream their reasoning separately.
    if let Some(reasoning) = delta["reasoning_content"].as_str().filter(|r| !r.is_empty()) {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Reasoning,
            content: reasoning.to_string(),
        }));
    }

    if let Some(content) = delta["content"].as_str().filter(|c| !c.is_empty()) {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Content,
            content: content.to_string(),
        }));
    }

    if first["finish_reason"].as_str().is_some() {
        return Ok(Some(StreamChunk {
            kind: StreamChunkKind::Done,
            content: String::new(),
        }));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_delta() {
        let chunk = parse_sse_line(r#"data: {"choices":[{"delta":{"content":"{\"action\""}}]}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(chunk.kind, StreamChunkKind::Content));
        assert_eq!(chunk.content, "{\"action\"");
    }

    #[test]
    fn reasoning_delta() {
        let chunk = parse_sse_line(r#"data: {"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(chunk.kind, StreamChunkKind::Reasoning));
    }

    #[test]
    fn done_marker_and_finish_reason() {
        let done = parse_sse_line("data: [DONE]").unwrap().unwrap();
        assert!(matches!(done.kind, StreamChunkKind::Done));

        let finish = parse_sse_line(r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(finish.kind, StreamChunkKind::Done));
    }

    #[test]
    fn ignores_comments_and_other_fields() {
        assert!(parse_sse_line(": keep-alive").unwrap().is_none());
        assert!(parse_sse_line("event: ping").unwrap().is_none());
        assert!(parse_sse_line("").unwrap().is_none());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(parse_sse_line("data: {not json").is_err());
    }
}
