//! 编排层：迭代驱动器、单轮迭代、决策策略、循环检测、进度事件与系统提示词

pub mod events;
pub mod iteration;
pub mod loop_;
pub mod loop_detection;
pub mod prompt;
pub mod strategy;

pub use events::{ProgressKind, ProgressSink, ProgressUpdate};
pub use iteration::{Iteration, IterationOutcome, LoopContext, ModelIteration};
pub use loop_::{AgentLoop, FailureReason, LoopConfig, LoopResult, LoopStatus};
pub use loop_detection::LoopDetector;
pub use prompt::{StaticPrompt, SystemPromptProvider, DEFAULT_SYSTEM_PROMPT};
pub use strategy::{
    looks_incomplete, AggressiveStrategy, ConservativeStrategy, DefaultStrategy, ErrorDecision,
    PlanningStrategy, Strategy,
};
