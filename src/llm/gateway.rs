//! The decision contract between the agent and a language model.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent_engine::state::Action;
use crate::errors::{SidePilotError, SidePilotResult};
use crate::llm::parse::parse_model_reply;
use crate::llm::registry::ProviderRegistry;
use crate::llm::types::{ChatMessage, ContentPart};
use crate::session::{PageInfo, TabInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: EntryRole,
    pub content: String,
}

/// Feedback for one action of the previous model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action: Action,
    pub success: bool,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// Only set on the first round of a turn.
    pub user_message: Option<String>,
    pub snapshot_tree: Value,
    /// Base64 PNG.
    pub screenshot: String,
    pub page: PageInfo,
    pub tabs: Vec<TabInfo>,
    pub conversation_history: Vec<ConversationEntry>,
    pub prior_action_results: Vec<ActionOutcome>,
    pub conversation_id: Option<String>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub conversation_id: String,
    pub message: String,
    pub actions: Vec<Action>,
}

#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Ask the model what to do next. Returns `SidePilotError::Cancelled` if
    /// the request's token fires first.
    async fn decide(&self, request: GatewayRequest) -> SidePilotResult<GatewayResponse>;
}

/// [`ModelGateway`] backed by the configured LLM providers.
pub struct LlmGateway {
    registry: Arc<Mutex<ProviderRegistry>>,
    system_prompt: String,
}

impl LlmGateway {
    pub fn new(registry: Arc<Mutex<ProviderRegistry>>, system_prompt: String) -> Self {
        Self {
            registry,
            system_prompt,
        }
    }

    pub fn registry(&self) -> Arc<Mutex<ProviderRegistry>> {
        Arc::clone(&self.registry)
    }

    fn build_messages(&self, request: &GatewayRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(request.conversation_history.len() + 3);
        messages.push(ChatMessage::text("system", self.system_prompt.clone()));
        for entry in &request.conversation_history {
            let role = match entry.role {
                EntryRole::User => "user",
                EntryRole::Assistant => "assistant",
            };
            messages.push(ChatMessage::text(role, entry.content.clone()));
        }
        if let Some(text) = &request.user_message {
            messages.push(ChatMessage::text("user", text.clone()));
        }
        messages.push(ChatMessage::parts(
            "user",
            vec![
                ContentPart::Text {
                    text: context_text(request),
                },
                ContentPart::png(&request.screenshot),
            ],
        ));
        messages
    }
}

/// The per-round page context. Sent once and not kept in the history.
pub fn context_text(request: &GatewayRequest) -> String {
    let mut out = String::new();

    if !request.prior_action_results.is_empty() {
        out.push_str("Results of your previous actions:\n");
        for (i, outcome) in request.prior_action_results.iter().enumerate() {
            let status = if outcome.success { "ok" } else { "failed" };
            let action = serde_json::to_string(&outcome.action).unwrap_or_default();
            let _ = writeln!(out, "{}. {action} -> {status}: {}", i + 1, outcome.description);
        }
        let last_ok = request
            .prior_action_results
            .last()
            .map(|o| o.success)
            .unwrap_or(true);
        let _ = writeln!(out, "last_action_success: {last_ok}\n");
    }

    let current_url = request
        .tabs
        .iter()
        .find(|t| t.active)
        .map(|t| t.url.as_str())
        .filter(|u| !u.is_empty())
        .unwrap_or(if request.page.url.is_empty() {
            "Unknown URL"
        } else {
            request.page.url.as_str()
        });
    let _ = writeln!(out, "Current URL: {current_url}");
    if !request.page.title.is_empty() {
        let _ = writeln!(out, "Page title: {}", request.page.title);
    }

    let tree = serde_json::to_string(&request.snapshot_tree)
        .unwrap_or_else(|_| "Error serializing accessibility data".to_string());
    let _ = writeln!(out, "Interactive Elements (JSON format):\n{tree}");

    out.push_str("\nAvailable tabs:\n");
    for tab in &request.tabs {
        let _ = writeln!(
            out,
            "- ID: {}, Title: {}, URL: {}, Active: {}",
            tab.id, tab.title, tab.url, tab.active
        );
    }
    out
}

#[async_trait]
impl ModelGateway for LlmGateway {
    async fn decide(&self, request: GatewayRequest) -> SidePilotResult<GatewayResponse> {
        if request.cancel.is_cancelled() {
            return Err(SidePilotError::Cancelled);
        }

        let conversation_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let (provider, cfg) = {
            let reg = self.registry.lock().await;
            reg.call_config()?
        };

        let messages = self.build_messages(&request);
        tracing::info!(
            conversation = %conversation_id,
            provider = provider.name(),
            history = request.conversation_history.len(),
            feedback = request.prior_action_results.len(),
            "requesting model decision"
        );

        let reply = tokio::select! {
            biased;
            _ = request.cancel.cancelled() => {
                tracing::info!(conversation = %conversation_id, "model request cancelled");
                return Err(SidePilotError::Cancelled);
            }
            reply = provider.chat(messages, &cfg) => reply?,
        };

        if !reply.reasoning.is_empty() {
            tracing::debug!(reasoning = %reply.reasoning, "model reasoning");
        }

        let parsed = parse_model_reply(&reply.content);
        tracing::info!(
            conversation = %conversation_id,
            actions = parsed.actions.len(),
            well_formed = parsed.well_formed,
            "model decision parsed"
        );

        Ok(GatewayResponse {
            conversation_id,
            message: parsed.message,
            actions: parsed.actions,
        })
    }
}
