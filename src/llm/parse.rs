use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::agent_engine::state::Action;

pub const PARSE_ERROR_MESSAGE: &str = "Error parsing AI response. Please try again.";

/// Model reply reduced to what the agent acts on.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub message: String,
    pub actions: Vec<Action>,
    /// False when the reply was not valid JSON.
    pub well_formed: bool,
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)\s*```").ok())
        .as_ref()
}

/// Strip Markdown code fences, or fall back to the outermost `{...}` span.
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(inner) = fence_regex()
        .and_then(|re| re.captures(trimmed))
        .and_then(|c| c.get(1))
    {
        return inner.as_str();
    }
    if trimmed.starts_with('{') {
        return trimmed;
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn non_empty_str(v: &Value) -> Option<String> {
    v.as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

pub fn parse_model_reply(raw: &str) -> ParsedReply {
    let body = extract_json(raw);
    let json: Value = match serde_json::from_str(body) {
        Ok(v @ Value::Object(_)) => v,
        Ok(_) | Err(_) => {
            tracing::warn!(reply_len = raw.len(), "model reply is not a JSON object");
            return ParsedReply {
                message: PARSE_ERROR_MESSAGE.to_string(),
                actions: Vec::new(),
                well_formed: false,
            };
        }
    };

    let message = non_empty_str(&json["current_state"]["message"])
        .or_else(|| non_empty_str(&json["message"]))
        .or_else(|| non_empty_str(&json["content"]))
        .unwrap_or_default();

    let raw_actions = json
        .get("action")
        .or_else(|| json.get("actions"))
        .cloned()
        .unwrap_or(Value::Null);
    let items = match raw_actions {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single @ Value::Object(_) => vec![single],
        other => {
            tracing::warn!(value = %other, "action field is not a list");
            Vec::new()
        }
    };

    let mut actions = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<Action>(item.clone()) {
            Ok(action) => actions.push(action),
            Err(e) => tracing::warn!(index, item = %item, error = %e, "skipping undecodable action"),
        }
    }

    ParsedReply {
        message,
        actions,
        well_formed: true,
    }
}
