pub mod gateway;
pub mod parse;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod sse_parser;
pub mod types;

pub use gateway::{
    ActionOutcome, ConversationEntry, EntryRole, GatewayRequest, GatewayResponse, LlmGateway,
    ModelGateway,
};
