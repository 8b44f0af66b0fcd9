use std::sync::Arc;

use tokio::sync::Mutex;

use crate::agent_engine::ConversationStore;
use crate::config::{self, AppConfig};
use crate::errors::{SidePilotError, SidePilotResult};
use crate::llm::registry::ProviderRegistry;

pub const HELP: &str = "\
Commands:
  /new            start a new conversation (closes the browser session)
  /conversations  list stored conversations
  /model [id]     list providers, or switch the active one
  /help           show this help
  /quit           exit
Anything else is sent to the agent. Press Ctrl+C to cancel a running turn.";

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Submit(String),
    NewConversation,
    Conversations,
    Model(Option<String>),
    Help,
    Quit,
}

impl Command {
    /// `None` for blank lines.
    pub fn parse(line: &str) -> SidePilotResult<Option<Command>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Command::Submit(line.to_string())));
        };

        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default().to_ascii_lowercase();
        let arg = parts.next().map(str::to_string);
        let cmd = match name.as_str() {
            "new" => Command::NewConversation,
            "conversations" | "history" => Command::Conversations,
            "model" => Command::Model(arg),
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => {
                return Err(SidePilotError::Config(format!(
                    "unknown command '/{other}', try /help"
                )))
            }
        };
        Ok(Some(cmd))
    }
}

/// Rendered conversation list, newest first.
pub async fn list_conversations(store: &dyn ConversationStore) -> SidePilotResult<String> {
    let conversations = store.list().await?;
    if conversations.is_empty() {
        return Ok("No stored conversations.".to_string());
    }
    let lines: Vec<String> = conversations
        .iter()
        .map(|c| {
            format!(
                "{}  {}  ({} messages)  {}",
                c.last_updated.format("%Y-%m-%d %H:%M"),
                c.title,
                c.message_count,
                c.preview
            )
        })
        .collect();
    Ok(lines.join("\n"))
}

/// With no name, list providers. Otherwise switch the active provider and
/// persist the choice to config.toml.
pub async fn select_model(
    registry: &Arc<Mutex<ProviderRegistry>>,
    config: &mut AppConfig,
    name: Option<&str>,
) -> SidePilotResult<String> {
    let mut reg = registry.lock().await;
    let Some(name) = name else {
        let active = reg.active_name().to_string();
        let lines: Vec<String> = reg
            .list_names()
            .iter()
            .map(|id| {
                let marker = if *id == active { "*" } else { " " };
                format!("{marker} {id}  {}", reg.display_name(id))
            })
            .collect();
        if lines.is_empty() {
            return Ok("No providers configured.".to_string());
        }
        return Ok(lines.join("\n"));
    };

    reg.set_active(name.to_string())?;
    config.llm.active_provider = name.to_string();
    if let Err(e) = config::save_config(config) {
        tracing::warn!(error = %e, "provider switched but config.toml was not updated");
    }
    Ok(format!("Active provider: {}", reg.display_name(name)))
}
