use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::agent_engine::state::{ActionRecord, ActionResult, AgentState, Message, Segment, TurnOutcome};

/// Progress notifications for a presentation layer. Indices address
/// `AgentEngine::messages()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChanged {
        state: AgentState,
    },
    MessageAppended {
        message_index: usize,
        message: Message,
    },
    MessageRemoved {
        message_index: usize,
    },
    SegmentAppended {
        message_index: usize,
        segment_index: usize,
        segment: Segment,
    },
    SegmentUpdated {
        message_index: usize,
        segment_index: usize,
        segment: Segment,
    },
    SegmentRemoved {
        message_index: usize,
        segment_index: usize,
    },
    ActionStatusChanged {
        message_index: usize,
        segment_index: usize,
        action_index: usize,
        record: ActionRecord,
        result: Option<ActionResult>,
    },
    TurnFinished {
        outcome: TurnOutcome,
    },
    ConversationReset,
}

pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Fire and forget; having no subscribers is normal.
    pub fn publish(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("engine event dropped, no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
