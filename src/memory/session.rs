//! 会话：一次编排任务的消息历史与运行元数据
//!
//! 由编排器独占；消息追加时校验 tool 消息必须回指已出现的 assistant 工具调用。

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::TokenUsage;

use super::conversation::{Message, Role};
use super::token_budget::TokenEstimator;

/// 会话累计 token 计数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounters {
    pub prompt: u64,
    pub completion: u64,
    pub cached: u64,
    pub cache_creation: u64,
    pub cache_read: u64,
}

impl TokenCounters {
    pub fn add(&mut self, usage: &TokenUsage) {
        self.prompt += usage.prompt_tokens;
        self.completion += usage.completion_tokens;
        self.cached += usage.cached_tokens;
        self.cache_creation += usage.cache_creation_tokens;
        self.cache_read += usage.cache_read_tokens;
    }

    pub fn total(&self) -> u64 {
        self.prompt + self.completion
    }
}

/// 任务终态（写入会话摘要）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed,
    Cancelled,
    LoopDetected,
}

/// 最近一次任务的摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub outcome: TaskOutcome,
    pub reason: String,
    pub iterations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub working_dir: PathBuf,
    messages: Vec<Message>,
    #[serde(default)]
    pub tokens: TokenCounters,
    #[serde(default)]
    pub files_read: BTreeSet<PathBuf>,
    #[serde(default)]
    pub files_modified: BTreeSet<PathBuf>,
    #[serde(default)]
    pub summary: Option<TaskSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: None,
            working_dir: working_dir.into(),
            messages: Vec::new(),
            tokens: TokenCounters::default(),
            files_read: BTreeSet::new(),
            files_modified: BTreeSet::new(),
            summary: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 追加消息；tool 消息的 tool_id 必须对应此前某条 assistant 消息发出的调用
    pub fn push(&mut self, message: Message) -> Result<(), AgentError> {
        if message.role == Role::Tool {
            let Some(id) = message.tool_id.as_deref() else {
                return Err(AgentError::InvalidMessage(
                    "tool message without tool_id".to_string(),
                ));
            };
            if !self.messages.iter().any(|m| m.emits_tool_call(id)) {
                return Err(AgentError::InvalidMessage(format!(
                    "tool result '{id}' does not match any earlier tool call"
                )));
            }
        }
        self.messages.push(message);
        self.touch();
        Ok(())
    }

    /// 用一条摘要消息替换前 `prefix_len` 条消息
    pub(crate) fn replace_prefix(&mut self, prefix_len: usize, summary: Message) {
        let prefix_len = prefix_len.min(self.messages.len());
        self.messages.splice(0..prefix_len, std::iter::once(summary));
        self.touch();
    }

    pub fn record_usage(&mut self, usage: &TokenUsage) {
        self.tokens.add(usage);
        self.touch();
    }

    pub fn record_file_read(&mut self, path: impl AsRef<Path>) {
        self.files_read.insert(path.as_ref().to_path_buf());
    }

    pub fn record_file_modified(&mut self, path: impl AsRef<Path>) {
        self.files_modified.insert(path.as_ref().to_path_buf());
    }

    pub fn set_summary(&mut self, summary: TaskSummary) {
        self.summary = Some(summary);
        self.touch();
    }

    /// 清空历史与运行元数据，保留 id / 名称 / 工作目录
    pub fn clear(&mut self) {
        self.messages.clear();
        self.tokens = TokenCounters::default();
        self.files_read.clear();
        self.files_modified.clear();
        self.summary = None;
        self.touch();
    }

    /// 每条消息的估算 token 数（与消息一一对应）
    pub fn message_token_counts(&self) -> Vec<usize> {
        self.messages
            .iter()
            .map(TokenEstimator::estimate_message)
            .collect()
    }

    pub fn estimated_tokens(&self) -> usize {
        TokenEstimator::estimate_messages(&self.messages)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::conversation::ToolCall;
    use serde_json::json;

    #[test]
    fn test_push_rejects_orphan_tool_result() {
        let mut session = Session::new("/tmp/project");
        session.push(Message::user("hello")).unwrap();
        let err = session
            .push(Message::tool_result("call_missing", "echo", "ok"))
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidMessage(_)));
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_push_accepts_matching_tool_result() {
        let mut session = Session::new("/tmp/project");
        session
            .push(Message::assistant_with_tool_calls(
                "",
                vec![ToolCall::new("call_1", "echo", json!({"text": "hi"}))],
            ))
            .unwrap();
        session
            .push(Message::tool_result("call_1", "echo", "hi"))
            .unwrap();
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn test_usage_accumulates() {
        let mut session = Session::new(".");
        let usage = TokenUsage {
            prompt_tokens: 100,
            completion_tokens: 20,
            cache_read_tokens: 50,
            ..Default::default()
        };
        session.record_usage(&usage);
        session.record_usage(&usage);
        assert_eq!(session.tokens.prompt, 200);
        assert_eq!(session.tokens.cache_read, 100);
        assert_eq!(session.tokens.total(), 240);
    }

    #[test]
    fn test_replace_prefix_and_clear() {
        let mut session = Session::new(".");
        for i in 0..4 {
            session.push(Message::user(format!("m{i}"))).unwrap();
        }
        session.record_file_read("src/lib.rs");
        session.replace_prefix(3, Message::system("summary"));
        assert_eq!(session.len(), 2);
        assert_eq!(session.messages()[0].content, "summary");
        assert_eq!(session.messages()[1].content, "m3");

        session.clear();
        assert!(session.is_empty());
        assert!(session.files_read.is_empty());
    }
}
