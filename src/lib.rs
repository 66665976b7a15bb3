//! Hive - Rust 编码智能体编排运行时
//!
//! 模块划分：
//! - **actor**: Actor 并发基座（有序邮箱、单写者状态），会话存储与 Todo 列表 Actor
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、编排状态、会话监管、工具调度、运行时编排器与构建器
//! - **interaction**: 用户交互桥（异步审批 / 提问，超时与取消）与非交互策略
//! - **llm**: 模型边界抽象（请求、补全、用量）与 Mock 实现
//! - **memory**: 消息、会话、Token 估算与上下文压缩
//! - **observability**: tracing 日志初始化
//! - **react**: 迭代状态机（Loop 驱动、Iteration、Strategy、循环检测、进度事件）
//! - **tools**: 工具注册表、授权闸门与调度执行器

pub mod actor;
pub mod config;
pub mod core;
pub mod interaction;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::core::{create_agent, AgentBuilder, AgentError, AgentHandle, Command};
pub use crate::react::{AgentLoop, LoopConfig, LoopResult, LoopStatus};
