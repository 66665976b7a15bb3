//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 Strategy 决定是重试、压缩还是终止。

use std::time::Duration;

use crate::core::{AgentError, RecoveryAction};
use crate::llm::LlmError;

/// 瞬时错误的默认重试间隔
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// 语义化错误恢复：将错误映射为可执行动作（重试 / 重试提示 / 压缩 / 终止）
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    retry_delay: Duration,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self {
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// 根据错误类型返回建议的恢复动作
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::Llm(LlmError::RateLimited { retry_after_ms }) => RecoveryAction::Retry {
                delay: Duration::from_millis(*retry_after_ms).max(self.retry_delay),
            },
            AgentError::Llm(e) if e.is_transient() => RecoveryAction::Retry {
                delay: self.retry_delay,
            },
            AgentError::Llm(LlmError::ContextLengthExceeded) => RecoveryAction::SummarizeAndPrune,
            AgentError::Llm(LlmError::InvalidResponse(raw)) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous response could not be processed ({raw}). \
                 Reply again with plain text or well-formed tool calls only."
            )),
            AgentError::InvalidMessage(msg) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous response was rejected: {msg}. Use only tool call ids you issued."
            )),
            _ => RecoveryAction::Abort,
        }
    }
}
