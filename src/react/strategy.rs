//! 决策策略：何时自动续跑、何时压缩、出错后重试还是放弃
//!
//! 驱动循环（AgentLoop）只负责机械地迭代，所有「继续 / 停止 / 压缩」的判断都交给 Strategy。

use std::time::Duration;

use async_trait::async_trait;

use crate::actor::TodoListHandle;
use crate::core::{AgentError, OrchestratorState, RecoveryAction, RecoveryEngine};
use crate::memory::ContextUsage;

const CONTINUE_PROMPT: &str =
    "Continue with the task. If it is already complete, reply with the final answer only.";

/// 回答以这些结尾时视为没说完
const INCOMPLETE_SUFFIXES: &[&str] = &[":", "：", "...", "…"];

/// 回答中出现这些短语时视为还有后续动作
const INCOMPLETE_PHRASES: &[&str] = &["let me ", "i will now", "i'll now", "next, i", "next i will"];

const FINAL_MARKERS: &[&str] = &["done", "complete", "finished", "final answer", "task is"];

/// 默认的激进压缩阈值（百分比）
pub const AGGRESSIVE_COMPACTION_PERCENT: u8 = 60;

/// 出错后的处理决定
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDecision {
    Retry { delay: Duration },
    RetryWithPrompt(String),
    Compact,
    Abort,
}

impl From<RecoveryAction> for ErrorDecision {
    fn from(action: RecoveryAction) -> Self {
        match action {
            RecoveryAction::Retry { delay } => ErrorDecision::Retry { delay },
            RecoveryAction::RetryWithPrompt(prompt) => ErrorDecision::RetryWithPrompt(prompt),
            RecoveryAction::SummarizeAndPrune => ErrorDecision::Compact,
            RecoveryAction::Abort => ErrorDecision::Abort,
        }
    }
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// 模型给出无工具调用的回答后：返回 Some(prompt) 表示以该提示自动续跑
    async fn continuation_prompt(&self, state: &OrchestratorState, answer: &str) -> Option<String>;

    fn should_compact(&self, usage: &ContextUsage) -> bool {
        usage.exceeds_threshold()
    }

    fn on_error(&self, state: &OrchestratorState, error: &AgentError) -> ErrorDecision;
}

/// 看起来没说完的回答
pub fn looks_incomplete(answer: &str) -> bool {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        return true;
    }
    if INCOMPLETE_SUFFIXES.iter().any(|s| trimmed.ends_with(s)) {
        return true;
    }
    let lower = trimmed.to_lowercase();
    INCOMPLETE_PHRASES.iter().any(|p| lower.contains(p))
}

fn looks_final(answer: &str) -> bool {
    let lower = answer.to_lowercase();
    FINAL_MARKERS.iter().any(|m| lower.contains(m))
}

#[derive(Debug, Clone, Default)]
pub struct DefaultStrategy {
    recovery: RecoveryEngine,
}

impl DefaultStrategy {
    pub fn new(recovery: RecoveryEngine) -> Self {
        Self { recovery }
    }
}

#[async_trait]
impl Strategy for DefaultStrategy {
    fn name(&self) -> &'static str {
        "default"
    }

    async fn continuation_prompt(&self, _state: &OrchestratorState, answer: &str) -> Option<String> {
        looks_incomplete(answer).then(|| CONTINUE_PROMPT.to_string())
    }

    fn on_error(&self, _state: &OrchestratorState, error: &AgentError) -> ErrorDecision {
        self.recovery.handle(error).into()
    }
}

/// 从不自动续跑，任何错误都终止
#[derive(Debug, Clone, Copy, Default)]
pub struct ConservativeStrategy;

#[async_trait]
impl Strategy for ConservativeStrategy {
    fn name(&self) -> &'static str {
        "conservative"
    }

    async fn continuation_prompt(&self, _state: &OrchestratorState, _answer: &str) -> Option<String> {
        None
    }

    fn on_error(&self, _state: &OrchestratorState, _error: &AgentError) -> ErrorDecision {
        ErrorDecision::Abort
    }
}

/// 除非回答明显是最终结论，否则继续；更早压缩
#[derive(Debug, Clone)]
pub struct AggressiveStrategy {
    recovery: RecoveryEngine,
    compaction_percent: u8,
}

impl AggressiveStrategy {
    pub fn new(recovery: RecoveryEngine) -> Self {
        Self {
            recovery,
            compaction_percent: AGGRESSIVE_COMPACTION_PERCENT,
        }
    }

    pub fn with_compaction_percent(mut self, percent: u8) -> Self {
        self.compaction_percent = percent.min(100);
        self
    }
}

impl Default for AggressiveStrategy {
    fn default() -> Self {
        Self::new(RecoveryEngine::new())
    }
}

#[async_trait]
impl Strategy for AggressiveStrategy {
    fn name(&self) -> &'static str {
        "aggressive"
    }

    async fn continuation_prompt(&self, _state: &OrchestratorState, answer: &str) -> Option<String> {
        (!looks_final(answer)).then(|| CONTINUE_PROMPT.to_string())
    }

    fn should_compact(&self, usage: &ContextUsage) -> bool {
        usage.exceeds_percent(self.compaction_percent.min(usage.threshold_percent))
    }

    fn on_error(&self, _state: &OrchestratorState, error: &AgentError) -> ErrorDecision {
        self.recovery.handle(error).into()
    }
}

/// 任务列表里还有未完成项时继续
pub struct PlanningStrategy {
    todos: TodoListHandle,
    recovery: RecoveryEngine,
}

impl PlanningStrategy {
    pub fn new(todos: TodoListHandle, recovery: RecoveryEngine) -> Self {
        Self { todos, recovery }
    }
}

#[async_trait]
impl Strategy for PlanningStrategy {
    fn name(&self) -> &'static str {
        "planning"
    }

    async fn continuation_prompt(&self, _state: &OrchestratorState, _answer: &str) -> Option<String> {
        match self.todos.unfinished_count().await {
            Ok(0) => None,
            Ok(n) => Some(format!(
                "{n} item(s) on the task list are not completed yet. Continue with the next one and keep the list updated with todo_write."
            )),
            Err(e) => {
                tracing::warn!(error = %e, "todo list unavailable, not continuing");
                None
            }
        }
    }

    fn on_error(&self, _state: &OrchestratorState, error: &AgentError) -> ErrorDecision {
        self.recovery.handle(error).into()
    }
}
