//! 状态定义：编排状态（单次任务内）与运行时快照（投影给前端）
//!
//! OrchestratorState 随循环启动创建、每轮更新、循环结束丢弃，不持久化；
//! RuntimeSnapshot 是前端看到的轻量投影，经 watch 通道发布。

use serde::Serialize;

use crate::react::{LoopDetector, LoopResult};

/// Agent 阶段（前端投影用）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    #[default]
    Idle,
    Thinking,
    ToolExecuting,
    Compacting,
    Finished,
    Error,
}

/// 前端看到的运行时快照
#[derive(Clone, Debug, Default, Serialize)]
pub struct RuntimeSnapshot {
    pub phase: AgentPhase,
    pub session_id: String,
    pub iteration: usize,
    pub message_count: usize,
    pub last_result: Option<LoopResult>,
}

/// 单次任务的编排状态
#[derive(Debug, Clone)]
pub struct OrchestratorState {
    /// 已开始的轮次
    pub iteration: usize,
    /// 连续自动续跑次数；执行过工具调用的轮次清零
    pub auto_continue_attempts: usize,
    /// 连续压缩次数；压缩后回到阈值内并完成一轮迭代即清零
    pub consecutive_compactions: usize,
    pub consecutive_errors: usize,
    /// 最近一次模型报告的 prompt tokens，压缩后清零
    pub last_prompt_tokens: usize,
    pub loop_detector: LoopDetector,
}

impl OrchestratorState {
    pub fn new(loop_window: usize, loop_threshold: usize) -> Self {
        Self {
            iteration: 0,
            auto_continue_attempts: 0,
            consecutive_compactions: 0,
            consecutive_errors: 0,
            last_prompt_tokens: 0,
            loop_detector: LoopDetector::new(loop_window, loop_threshold),
        }
    }
}

impl Default for OrchestratorState {
    fn default() -> Self {
        Self::new(10, 3)
    }
}
