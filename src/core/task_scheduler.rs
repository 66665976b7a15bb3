//! 任务调度：工具并发池
//!
//! 并行工具批次中，每个调用执行前先获取 Semaphore 许可，限制同时运行的工具数。

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::AgentError;

/// 任务调度器
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    /// 工具并发限制（默认 3）
    tool_semaphore: Arc<Semaphore>,
    max_concurrent_tools: usize,
}

impl TaskScheduler {
    pub fn new(max_concurrent_tools: usize) -> Self {
        let max_concurrent_tools = max_concurrent_tools.max(1);
        Self {
            tool_semaphore: Arc::new(Semaphore::new(max_concurrent_tools)),
            max_concurrent_tools,
        }
    }

    /// 获取工具执行许可
    pub async fn acquire_tool(&self) -> Result<OwnedSemaphorePermit, AgentError> {
        self.tool_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AgentError::ToolExecutionFailed("tool pool closed".to_string()))
    }

    pub fn available_permits(&self) -> usize {
        self.tool_semaphore.available_permits()
    }

    pub fn max_concurrent_tools(&self) -> usize {
        self.max_concurrent_tools
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permits_are_bounded() {
        let scheduler = TaskScheduler::new(2);
        let a = scheduler.acquire_tool().await.unwrap();
        let _b = scheduler.acquire_tool().await.unwrap();
        assert_eq!(scheduler.available_permits(), 0);
        drop(a);
        assert_eq!(scheduler.available_permits(), 1);
        assert_eq!(TaskScheduler::new(0).max_concurrent_tools(), 1);
    }
}
