pub mod engine;
pub mod event_bus;
pub mod history;
pub mod loop_control;
pub mod state;

pub use engine::AgentEngine;
pub use event_bus::{EngineEvent, EventBus};
pub use history::{ConversationInfo, ConversationStore, JsonlConversationStore, MemoryConversationStore};
