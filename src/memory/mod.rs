//! 记忆层：会话消息、会话状态、Token 估算与上下文压缩

pub mod compaction;
pub mod conversation;
pub mod session;
pub mod token_budget;

pub use compaction::{
    compact_prefix, condense_content, resolve_context_window, select_compaction_prefix,
    CompactionReport, ContextCompactor, ContextUsage,
};
pub use conversation::{Message, Role, ToolCall};
pub use session::{Session, TaskOutcome, TaskSummary, TokenCounters};
pub use token_budget::TokenEstimator;
