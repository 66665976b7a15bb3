//! Mock LLM 客户端（用于测试与本地演示，无需 API）
//!
//! - MockLlmClient：用户消息 -> echo 工具调用；工具结果 -> 文本总结，便于本地跑通编排流程。
//! - ScriptedLlmClient：按顺序返回预置补全，并记录收到的请求。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::{Completion, CompletionRequest, LlmClient, LlmError};
use crate::memory::{Role, ToolCall};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug)]
pub struct MockLlmClient {
    model: String,
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_with_request(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let Some(last) = request.messages.last() else {
            return Ok(Completion::text("(no input)"));
        };
        let has_echo = request.tools.iter().any(|t| t.name == "echo");
        match last.role {
            Role::Tool => Ok(Completion::text(format!(
                "Tool `{}` returned: {}",
                last.tool_name.as_deref().unwrap_or("unknown"),
                last.content
            ))),
            Role::User if has_echo => {
                let call = ToolCall::new(
                    format!("call_{}", uuid::Uuid::new_v4().simple()),
                    "echo",
                    json!({ "text": format!("Echo from Mock: {}", last.content) }),
                );
                Ok(Completion::with_tool_calls("", vec![call]))
            }
            _ => Ok(Completion::text(format!("Echo from Mock: {}", last.content))),
        }
    }
}

/// 脚本客户端：依次弹出预置结果；脚本耗尽后回答 "done"
pub struct ScriptedLlmClient {
    model: String,
    context_window: Option<usize>,
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            context_window: None,
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_context_window(mut self, window: usize) -> Self {
        self.context_window = Some(window);
        self
    }

    pub fn then(self, completion: Completion) -> Self {
        self.push(Ok(completion));
        self
    }

    pub fn then_error(self, error: LlmError) -> Self {
        self.push(Err(error));
        self
    }

    pub fn push(&self, item: Result<Completion, LlmError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(item);
    }

    /// 已收到的请求（按时间顺序）
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> Option<usize> {
        self.context_window
    }

    async fn complete_with_request(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        next.unwrap_or_else(|| Ok(Completion::text("done")))
    }
}
