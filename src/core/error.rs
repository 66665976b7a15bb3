//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 AgentError 决定 Retry / RetryWithPrompt / SummarizeAndPrune / Abort。

use std::time::Duration;

use thiserror::Error;

use crate::actor::ActorError;
use crate::interaction::InteractionError;
use crate::llm::LlmError;

/// Agent 运行过程中可能出现的错误（模型、工具、授权、交互、存储等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Interaction failed: {0}")]
    Interaction(#[from] InteractionError),

    #[error("Actor error: {0}")]
    Actor(#[from] ActorError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cancelled")]
    Cancelled,
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 等待后原样重试（网络抖动、限流）
    Retry { delay: Duration },
    /// 将提示注入下一轮，让 LLM 重试（如响应格式错误）
    RetryWithPrompt(String),
    /// 压缩上下文后继续（如超长上下文）
    SummarizeAndPrune,
    /// 终止当前任务
    Abort,
}
