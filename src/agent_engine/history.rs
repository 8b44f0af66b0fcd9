use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::agent_engine::state::{Message, SegmentKind};
use crate::errors::{SidePilotError, SidePilotResult};

const PREVIEW_CHARS: usize = 100;

/// Summary row for a stored conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub message_count: usize,
    pub preview: String,
}

/// Receives the message list whenever a turn settles.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn on_turn_settled(&self, conversation_id: &str, messages: &[Message]) -> SidePilotResult<()>;

    /// Stored conversations, most recently updated first.
    async fn list(&self) -> SidePilotResult<Vec<ConversationInfo>>;
}

/// Text shown for a message: its content, or the last non-thinking segment.
pub fn message_text(message: &Message) -> &str {
    if !message.content.is_empty() {
        return &message.content;
    }
    message
        .segments
        .iter()
        .rev()
        .find(|s| s.kind != SegmentKind::Thinking)
        .map(|s| s.content.as_str())
        .unwrap_or("")
}

fn preview_of(messages: &[Message]) -> String {
    let Some(text) = messages.iter().rev().map(message_text).find(|t| !t.is_empty()) else {
        return String::new();
    };
    let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview
}

fn title_for(id: &str) -> String {
    let short: String = id.chars().take(8).collect();
    format!("Conversation {short}")
}

fn info_for(
    id: &str,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    messages: &[Message],
) -> ConversationInfo {
    ConversationInfo {
        id: id.to_string(),
        title: title_for(id),
        created_at,
        last_updated,
        message_count: messages.len(),
        preview: preview_of(messages),
    }
}

/// One line of a conversation log: the messages added since the previous
/// line. `offset` is the index of the first of them in the full list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TurnLine {
    ts: i64,
    conversation_id: String,
    #[serde(default)]
    offset: usize,
    messages: Vec<Message>,
}

/// A conversation log replayed into its full message list.
struct ReplayedLog {
    conversation_id: String,
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    messages: Vec<Message>,
}

/// Appends the messages added by each settled turn to
/// `<dir>/conversation_<id>.jsonl`.
pub struct JsonlConversationStore {
    dir: PathBuf,
    saved: tokio::sync::Mutex<HashMap<String, usize>>,
}

impl JsonlConversationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            saved: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// `[store] directory` if set, else `<data dir>/sidepilot/conversations`.
    pub fn from_config(dir: Option<&Path>) -> Self {
        match dir {
            Some(d) => Self::new(d),
            None => Self::new(default_dir()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, conversation_id: &str) -> PathBuf {
        let safe: String = conversation_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("conversation_{safe}.jsonl"))
    }

    async fn read_log(path: &Path) -> SidePilotResult<Option<ReplayedLog>> {
        let content = tokio::fs::read_to_string(path).await?;
        let mut log: Option<ReplayedLog> = None;
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let entry = match serde_json::from_str::<TurnLine>(line) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping corrupt log line");
                    continue;
                }
            };
            let ts = millis_to_utc(entry.ts);
            let replay = log.get_or_insert_with(|| ReplayedLog {
                conversation_id: entry.conversation_id.clone(),
                created_at: ts,
                last_updated: ts,
                messages: Vec::new(),
            });
            replay.messages.truncate(entry.offset);
            replay.messages.extend(entry.messages);
            replay.last_updated = ts;
        }
        Ok(log)
    }

    /// Messages already on disk for this conversation.
    async fn saved_count(
        saved: &mut HashMap<String, usize>,
        conversation_id: &str,
        path: &Path,
    ) -> SidePilotResult<usize> {
        if let Some(count) = saved.get(conversation_id) {
            return Ok(*count);
        }
        let count = match Self::read_log(path).await {
            Ok(log) => log.map(|l| l.messages.len()).unwrap_or(0),
            Err(SidePilotError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        saved.insert(conversation_id.to_string(), count);
        Ok(count)
    }
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

#[async_trait]
impl ConversationStore for JsonlConversationStore {
    async fn on_turn_settled(&self, conversation_id: &str, messages: &[Message]) -> SidePilotResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.file_for(conversation_id);

        let mut saved = self.saved.lock().await;
        let stored = Self::saved_count(&mut saved, conversation_id, &path).await?;
        // A shorter list than what is stored restarts the log contents.
        let offset = if messages.len() >= stored { stored } else { 0 };
        let added = &messages[offset..];
        if added.is_empty() {
            return Ok(());
        }

        let line = serde_json::to_string(&TurnLine {
            ts: Utc::now().timestamp_millis(),
            conversation_id: conversation_id.to_string(),
            offset,
            messages: added.to_vec(),
        })?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        saved.insert(conversation_id.to_string(), messages.len());

        tracing::debug!(path = %path.display(), offset, added = added.len(), "conversation flushed");
        Ok(())
    }

    async fn list(&self) -> SidePilotResult<Vec<ConversationInfo>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut infos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("conversation_") && n.ends_with(".jsonl"));
            if !is_log {
                continue;
            }
            if let Some(log) = Self::read_log(&path).await? {
                infos.push(info_for(
                    &log.conversation_id,
                    log.created_at,
                    log.last_updated,
                    &log.messages,
                ));
            }
        }
        infos.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(infos)
    }
}

fn default_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .map(|d| d.join("sidepilot").join("conversations"))
        .unwrap_or_else(|| PathBuf::from("conversations"))
}

/// Keeps conversations in memory only.
#[derive(Default)]
pub struct MemoryConversationStore {
    conversations: tokio::sync::Mutex<HashMap<String, StoredConversation>>,
}

struct StoredConversation {
    created_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
    messages: Vec<Message>,
    saves: usize,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self, conversation_id: &str) -> Option<Vec<Message>> {
        self.conversations
            .lock()
            .await
            .get(conversation_id)
            .map(|c| c.messages.clone())
    }

    /// How many times `on_turn_settled` ran for this conversation.
    pub async fn save_count(&self, conversation_id: &str) -> usize {
        self.conversations
            .lock()
            .await
            .get(conversation_id)
            .map(|c| c.saves)
            .unwrap_or(0)
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn on_turn_settled(&self, conversation_id: &str, messages: &[Message]) -> SidePilotResult<()> {
        let now = Utc::now();
        let mut guard = self.conversations.lock().await;
        let entry = guard
            .entry(conversation_id.to_string())
            .or_insert_with(|| StoredConversation {
                created_at: now,
                last_updated: now,
                messages: Vec::new(),
                saves: 0,
            });
        entry.messages = messages.to_vec();
        entry.last_updated = now;
        entry.saves += 1;
        Ok(())
    }

    async fn list(&self) -> SidePilotResult<Vec<ConversationInfo>> {
        let guard = self.conversations.lock().await;
        let mut infos: Vec<ConversationInfo> = guard
            .iter()
            .map(|(id, c)| info_for(id, c.created_at, c.last_updated, &c.messages))
            .collect();
        infos.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        Ok(infos)
    }
}
