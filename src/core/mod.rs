//! 核心编排层：错误与恢复、状态、会话监管、任务调度、构建器与主控任务

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;
pub mod task_scheduler;

pub use builder::{interaction_bridge, strategy_by_name, AgentBuilder, AgentComponents};
pub use error::{AgentError, RecoveryAction};
pub use orchestrator::{create_agent, AgentHandle, Command};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{AgentPhase, OrchestratorState, RuntimeSnapshot};
pub use task_scheduler::TaskScheduler;
