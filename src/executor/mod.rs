pub mod dispatcher;
pub mod effects;
pub mod settle;

pub use dispatcher::ActionExecutor;
pub use effects::VisualCues;
pub use settle::SettlePolicy;
