//! LLM 客户端抽象
//!
//! 编排循环只依赖 LlmClient：complete_with_request（非流式）与 stream（逐块回调，默认退化为非流式）。
//! 具体 HTTP 客户端在本 crate 之外实现。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::memory::{Message, ToolCall};
use crate::tools::ToolSchema;

/// 模型边界错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Context length exceeded")]
    ContextLengthExceeded,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
}

impl LlmError {
    /// 网络抖动、超时、限流属于可重试错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LlmError::Network(_) | LlmError::Timeout | LlmError::RateLimited { .. }
        ) || matches!(self, LlmError::Api { status, .. } if *status >= 500)
    }
}

/// 采样参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

/// 一次补全请求
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub sampling: SamplingParams,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Other(String),
}

/// 单次请求的 token 用量（Provider 报告）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    #[serde(default)]
    pub cached_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
}

/// 模型补全结果
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: StopReason,
    pub usage: TokenUsage,
    /// Provider 原生的 assistant 消息表示，原样回写到会话
    pub provider_metadata: Option<Value>,
}

impl Completion {
    /// 纯文本回答
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
            provider_metadata: None,
        }
    }

    /// 带工具调用的回答
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage::default(),
            provider_metadata: None,
        }
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_provider_metadata(mut self, metadata: Value) -> Self {
        self.provider_metadata = Some(metadata);
        self
    }

    /// 转成写入会话的 assistant 消息，携带 Provider 元数据
    pub fn to_assistant_message(&self) -> Message {
        let message = if self.tool_calls.is_empty() {
            Message::assistant(self.content.clone())
        } else {
            Message::assistant_with_tool_calls(self.content.clone(), self.tool_calls.clone())
        };
        match &self.provider_metadata {
            Some(metadata) => message.with_provider_metadata(metadata.clone()),
            None => message,
        }
    }
}

/// 流式输出块
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Text(String),
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model_name(&self) -> &str;

    /// Provider 报告的上下文窗口；None 时按模型名查表
    fn context_window(&self) -> Option<usize> {
        None
    }

    /// 非流式完成
    async fn complete_with_request(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;

    /// 流式完成：文本块经 on_chunk 回调，返回完整补全
    async fn stream(
        &self,
        request: &CompletionRequest,
        on_chunk: &mut (dyn FnMut(StreamChunk) + Send),
    ) -> Result<Completion, LlmError> {
        let completion = self.complete_with_request(request).await?;
        if !completion.content.is_empty() {
            on_chunk(StreamChunk::Text(completion.content.clone()));
        }
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Role;
    use serde_json::json;

    #[test]
    fn test_assistant_message_keeps_provider_metadata() {
        let call = ToolCall::new("c1", "echo", json!({"text": "hi"}));
        let completion = Completion::with_tool_calls("checking", vec![call])
            .with_provider_metadata(json!({"id": "msg_01", "blocks": 2}));
        let message = completion.to_assistant_message();
        assert_eq!(message.role, Role::Assistant);
        assert!(message.emits_tool_call("c1"));
        assert_eq!(message.provider_metadata, Some(json!({"id": "msg_01", "blocks": 2})));

        let plain = Completion::text("done").to_assistant_message();
        assert_eq!(plain.provider_metadata, None);
        assert!(plain.tool_calls.is_empty());
    }

    #[test]
    fn test_transient_errors() {
        assert!(LlmError::Timeout.is_transient());
        assert!(LlmError::RateLimited { retry_after_ms: 10 }.is_transient());
        assert!(LlmError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_transient());
        assert!(!LlmError::Api {
            status: 400,
            message: "bad".into()
        }
        .is_transient());
        assert!(!LlmError::ContextLengthExceeded.is_transient());
    }
}
