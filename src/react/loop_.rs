//! 编排主循环
//!
//! 每轮：取消检查 -> 轮次上限 -> 压缩检查 -> 执行 Iteration -> 循环检测 -> 处理结果（续跑 / 完成 / 错误决策）。
//! 终态为 Completed / Failed / Cancelled / LoopDetected，结束时把 TaskSummary 写入会话。

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::{AgentError, OrchestratorState};
use crate::memory::{ContextCompactor, ContextUsage, Message, TaskOutcome, TaskSummary};
use crate::react::{
    ErrorDecision, Iteration, IterationOutcome, LoopContext, ProgressKind, ProgressUpdate, Strategy,
};

/// 循环配置；字段均有默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopConfig {
    pub max_iterations: usize,
    pub max_auto_continue_attempts: usize,
    pub enable_loop_detection: bool,
    pub enable_auto_continue: bool,
    pub context_compaction_threshold_percent: u8,
    pub max_consecutive_compactions: usize,
    pub loop_detection_window: usize,
    pub loop_detection_threshold: usize,
    /// 连续出错后允许的重试次数
    pub max_retries: usize,
    /// 压缩时保留的最近消息条数
    pub compaction_keep_recent: usize,
    pub condensed_message_chars: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            max_auto_continue_attempts: 3,
            enable_loop_detection: true,
            enable_auto_continue: true,
            context_compaction_threshold_percent: 80,
            max_consecutive_compactions: 3,
            loop_detection_window: 10,
            loop_detection_threshold: 3,
            max_retries: 2,
            compaction_keep_recent: 2,
            condensed_message_chars: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// 达到轮次上限仍未完成
    MaxIterationsReached(usize),
    /// 连续压缩仍无法放进上下文窗口（携带当时的 token 数）
    ContextBudgetExceeded(usize),
    ModelError(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::MaxIterationsReached(n) => {
                write!(f, "stopped after reaching the limit of {n} iterations")
            }
            FailureReason::ContextBudgetExceeded(tokens) => write!(
                f,
                "conversation ({tokens} tokens) cannot fit in the context window after repeated compaction"
            ),
            FailureReason::ModelError(e) => write!(f, "model error: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum LoopStatus {
    Completed,
    Failed(FailureReason),
    Cancelled,
    /// 携带重复的工具调用签名
    LoopDetected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoopResult {
    pub status: LoopStatus,
    pub iterations_executed: usize,
    pub success: bool,
    pub response: Option<String>,
    pub reason: String,
}

impl LoopResult {
    fn new(status: LoopStatus, iterations_executed: usize, response: Option<String>) -> Self {
        let reason = match &status {
            LoopStatus::Completed => "completed".to_string(),
            LoopStatus::Failed(reason) => reason.to_string(),
            LoopStatus::Cancelled => "cancelled".to_string(),
            LoopStatus::LoopDetected(signature) => {
                format!("the same tool call kept repeating: {signature}")
            }
        };
        Self {
            success: status == LoopStatus::Completed,
            status,
            iterations_executed,
            response,
            reason,
        }
    }

    fn outcome(&self) -> TaskOutcome {
        match self.status {
            LoopStatus::Completed => TaskOutcome::Completed,
            LoopStatus::Failed(_) => TaskOutcome::Failed,
            LoopStatus::Cancelled => TaskOutcome::Cancelled,
            LoopStatus::LoopDetected(_) => TaskOutcome::LoopDetected,
        }
    }
}

/// 迭代驱动器
pub struct AgentLoop {
    config: LoopConfig,
    iteration: Arc<dyn Iteration>,
    strategy: Arc<dyn Strategy>,
    compactor: ContextCompactor,
}

impl AgentLoop {
    pub fn new(config: LoopConfig, iteration: Arc<dyn Iteration>, strategy: Arc<dyn Strategy>) -> Self {
        let compactor = ContextCompactor::new(
            config.context_compaction_threshold_percent,
            config.compaction_keep_recent,
            config.condensed_message_chars,
        );
        Self {
            config,
            iteration,
            strategy,
            compactor,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// 运行直到终态；会话中应已包含本次任务的用户消息
    pub async fn run(&self, ctx: &mut LoopContext) -> LoopResult {
        ctx.state = OrchestratorState::new(
            self.config.loop_detection_window,
            self.config.loop_detection_threshold,
        );
        tracing::info!(
            session_id = %ctx.session.id,
            strategy = self.strategy.name(),
            max_iterations = self.config.max_iterations,
            "agent loop started"
        );

        let mut last_answer: Option<String> = None;
        let status = loop {
            if ctx.cancel.is_cancelled() {
                break LoopStatus::Cancelled;
            }
            if ctx.state.iteration >= self.config.max_iterations {
                tracing::warn!(iterations = ctx.state.iteration, "iteration limit reached");
                break LoopStatus::Failed(FailureReason::MaxIterationsReached(
                    self.config.max_iterations,
                ));
            }

            // 压缩后仍超出阈值时，本轮不算正常迭代，连续压缩计数不清零
            let usage = self.context_usage(ctx);
            let mut over_budget = self.strategy.should_compact(&usage);
            if over_budget {
                if let Err(status) = self.compact(ctx, usage.used_tokens) {
                    break status;
                }
                over_budget = self.strategy.should_compact(&self.context_usage(ctx));
            } else {
                ctx.state.consecutive_compactions = 0;
            }

            ctx.state.iteration += 1;
            let iteration = ctx.state.iteration;
            tracing::debug!(iteration, "iteration started");
            ctx.progress.emit(ProgressUpdate::log(
                ProgressKind::IterationStarted,
                format!("Iteration {iteration}/{}", self.config.max_iterations),
            ));

            match self.iteration.run(ctx).await {
                Ok(IterationOutcome::Continue) => {
                    ctx.state.consecutive_errors = 0;
                    ctx.state.auto_continue_attempts = 0;
                    if !over_budget {
                        ctx.state.consecutive_compactions = 0;
                    }
                    if self.config.enable_loop_detection {
                        if let Some(signature) = ctx.state.loop_detector.detect() {
                            tracing::warn!(iteration, signature = %signature, "tool call loop detected");
                            break LoopStatus::LoopDetected(signature);
                        }
                    }
                }
                Ok(IterationOutcome::Answer(answer)) => {
                    ctx.state.consecutive_errors = 0;
                    if !over_budget {
                        ctx.state.consecutive_compactions = 0;
                    }
                    ctx.state.loop_detector.reset();
                    if let Some(prompt) = self.continuation(ctx, &answer).await {
                        ctx.state.auto_continue_attempts += 1;
                        tracing::info!(
                            iteration,
                            attempt = ctx.state.auto_continue_attempts,
                            "auto-continuing"
                        );
                        ctx.progress.emit(ProgressUpdate::status(
                            ProgressKind::AutoContinue,
                            "Answer looks incomplete, continuing",
                        ));
                        if let Err(e) = ctx.session.push(Message::user(prompt)) {
                            break LoopStatus::Failed(FailureReason::ModelError(e.to_string()));
                        }
                        last_answer = Some(answer);
                        continue;
                    }
                    last_answer = Some(answer);
                    break LoopStatus::Completed;
                }
                Ok(IterationOutcome::Break) => break LoopStatus::Completed,
                Err(AgentError::Cancelled) => break LoopStatus::Cancelled,
                Err(e) => {
                    if let Some(status) = self.handle_error(ctx, e).await {
                        break status;
                    }
                }
            }
        };

        let result = LoopResult::new(status, ctx.state.iteration, last_answer);
        ctx.session.set_summary(TaskSummary {
            outcome: result.outcome(),
            reason: result.reason.clone(),
            iterations: result.iterations_executed,
            response: result.response.clone(),
            finished_at: Utc::now(),
        });
        ctx.progress.emit(ProgressUpdate::status(
            ProgressKind::Finished,
            result.reason.clone(),
        ));
        tracing::info!(
            session_id = %ctx.session.id,
            iterations = result.iterations_executed,
            success = result.success,
            reason = %result.reason,
            "agent loop finished"
        );
        result
    }

    fn context_usage(&self, ctx: &LoopContext) -> ContextUsage {
        ContextUsage::new(
            ctx.session
                .estimated_tokens()
                .max(ctx.state.last_prompt_tokens),
            ctx.context_window,
            self.config.context_compaction_threshold_percent,
        )
    }

    async fn continuation(&self, ctx: &LoopContext, answer: &str) -> Option<String> {
        if !self.config.enable_auto_continue
            || ctx.state.auto_continue_attempts >= self.config.max_auto_continue_attempts
            || ctx.state.iteration >= self.config.max_iterations
        {
            return None;
        }
        self.strategy.continuation_prompt(&ctx.state, answer).await
    }

    /// 压缩一次；连续压缩次数超过上限时返回失败终态
    fn compact(&self, ctx: &mut LoopContext, used_tokens: usize) -> Result<(), LoopStatus> {
        ctx.state.consecutive_compactions += 1;
        if ctx.state.consecutive_compactions > self.config.max_consecutive_compactions {
            tracing::error!(
                used_tokens,
                context_window = ctx.context_window,
                "context still over budget after repeated compaction"
            );
            return Err(LoopStatus::Failed(FailureReason::ContextBudgetExceeded(
                used_tokens,
            )));
        }
        let report = self.compactor.compact(&mut ctx.session, ctx.context_window);
        ctx.state.last_prompt_tokens = 0;
        ctx.progress.emit(ProgressUpdate::status(
            ProgressKind::Compaction,
            format!(
                "Compacted {} messages ({} -> {} tokens)",
                report.messages_replaced, report.tokens_before, report.tokens_after
            ),
        ));
        Ok(())
    }

    /// 迭代出错：返回 Some 表示终止
    async fn handle_error(&self, ctx: &mut LoopContext, error: AgentError) -> Option<LoopStatus> {
        ctx.state.consecutive_errors += 1;
        let decision = self.strategy.on_error(&ctx.state, &error);
        tracing::warn!(
            iteration = ctx.state.iteration,
            error = %error,
            decision = ?decision,
            "iteration failed"
        );
        ctx.progress
            .emit(ProgressUpdate::status(ProgressKind::Error, error.to_string()));

        let fail = || Some(LoopStatus::Failed(FailureReason::ModelError(error.to_string())));
        if decision == ErrorDecision::Abort || ctx.state.consecutive_errors > self.config.max_retries {
            return fail();
        }
        match decision {
            ErrorDecision::Retry { delay } => {
                ctx.progress.emit(ProgressUpdate::status(
                    ProgressKind::Retry,
                    format!("Retrying in {}ms", delay.as_millis()),
                ));
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return Some(LoopStatus::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                None
            }
            ErrorDecision::RetryWithPrompt(prompt) => match ctx.session.push(Message::user(prompt)) {
                Ok(()) => None,
                Err(_) => fail(),
            },
            ErrorDecision::Compact => {
                let used = ctx.session.estimated_tokens();
                self.compact(ctx, used).err()
            }
            ErrorDecision::Abort => fail(),
        }
    }
}
