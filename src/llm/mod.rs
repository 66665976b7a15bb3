//! LLM 层：模型边界抽象（请求 / 补全 / 用量）与 Mock 实现

pub mod mock;
pub mod traits;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use traits::{
    Completion, CompletionRequest, LlmClient, LlmError, SamplingParams, StopReason, StreamChunk,
    TokenUsage,
};
