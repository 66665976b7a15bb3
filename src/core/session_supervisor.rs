//! 会话监管：任务级取消
//!
//! 根 token 管整个 Agent 的生命周期；每个任务从根 token 派生子 token，Cancel 只取消当前任务。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct SessionSupervisor {
    root: CancellationToken,
    current: Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let current = Mutex::new(root.child_token());
        Self { root, current }
    }

    /// 为新任务派生取消令牌，替换上一个
    pub fn begin_task(&self) -> CancellationToken {
        let token = self.root.child_token();
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = token.clone();
        token
    }

    pub fn current_token(&self) -> CancellationToken {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 取消当前任务（用户 Stop）
    pub fn cancel(&self) {
        self.current_token().cancel();
    }

    /// 取消所有任务，之后派生的 token 也立即处于取消状态
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_only_affects_current_task() {
        let supervisor = SessionSupervisor::new();
        let first = supervisor.begin_task();
        supervisor.cancel();
        assert!(first.is_cancelled());

        let second = supervisor.begin_task();
        assert!(!second.is_cancelled());

        supervisor.shutdown();
        assert!(second.is_cancelled());
        assert!(supervisor.begin_task().is_cancelled());
        assert!(supervisor.is_shut_down());
    }
}
