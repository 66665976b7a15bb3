//! 工具调度执行器
//!
//! 在注册表之上加授权闸门、单次超时（`timeout_secs` 参数，钳制到上限）、活跃调用跟踪与 JSON 审计日志。
//! 批量执行时授权按声明顺序串行询问，执行可并行（受 TaskScheduler 限制），结果按声明顺序返回。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::TaskScheduler;
use crate::memory::{condense_content, ToolCall};
use crate::tools::authorization::{approval_reason, AuthorizationRequest, Authorizer};
use crate::tools::{ToolContext, ToolRegistry, ToolResult};

pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;
pub const MAX_TOOL_TIMEOUT_SECS: u64 = 600;

const ARGS_PREVIEW_CHARS: usize = 200;

/// 正在执行的调用
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveCall {
    pub call_id: String,
    pub tool_name: String,
    pub elapsed_ms: u64,
}

type ActiveMap = Mutex<HashMap<String, (String, Instant)>>;

/// 调用结束（包括被取消、future 被丢弃）时移除跟踪记录
struct ActiveGuard<'a> {
    active: &'a ActiveMap,
    call_id: String,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.call_id);
    }
}

/// 工具调度执行器
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    authorizer: Arc<dyn Authorizer>,
    scheduler: TaskScheduler,
    default_timeout: Duration,
    max_timeout: Duration,
    working_dir: PathBuf,
    active: ActiveMap,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            registry,
            authorizer,
            scheduler: TaskScheduler::default(),
            default_timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
            max_timeout: Duration::from_secs(MAX_TOOL_TIMEOUT_SECS),
            working_dir: PathBuf::from("."),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_timeouts(mut self, default_secs: u64, max_secs: u64) -> Self {
        let max_secs = max_secs.max(1);
        self.max_timeout = Duration::from_secs(max_secs);
        self.default_timeout = Duration::from_secs(default_secs.clamp(1, max_secs));
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.scheduler = TaskScheduler::new(max_parallel);
        self
    }

    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = working_dir.into();
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    /// 当前正在执行的调用
    pub fn active_calls(&self) -> Vec<ActiveCall> {
        let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let mut calls: Vec<ActiveCall> = active
            .iter()
            .map(|(id, (name, started))| ActiveCall {
                call_id: id.clone(),
                tool_name: name.clone(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            })
            .collect();
        calls.sort_by(|a, b| b.elapsed_ms.cmp(&a.elapsed_ms));
        calls
    }

    /// 单次调用超时：参数 `timeout_secs` 优先（0 视为未设置），钳制到上限
    pub fn effective_timeout(&self, call: &ToolCall) -> Duration {
        call.parameters
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }

    /// 执行单个调用（授权 -> 执行）
    pub async fn execute(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResult {
        if let Some(denied) = self.authorize(call, cancel).await {
            self.audit(call, &denied, "denied");
            return denied;
        }
        self.run_authorized(call, cancel).await
    }

    /// 批量执行；结果顺序与 `calls` 一致
    pub async fn execute_batch(
        &self,
        calls: &[ToolCall],
        parallel: bool,
        cancel: &CancellationToken,
    ) -> Vec<ToolResult> {
        if !parallel || calls.len() <= 1 {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                if cancel.is_cancelled() {
                    results.push(ToolResult::error(call, "cancelled before execution"));
                    continue;
                }
                results.push(self.execute(call, cancel).await);
            }
            return results;
        }

        // 授权提示按声明顺序逐个发出
        let mut denials = Vec::with_capacity(calls.len());
        for call in calls {
            denials.push(self.authorize(call, cancel).await);
        }

        let runs = calls.iter().zip(denials).map(|(call, denial)| async move {
            if let Some(denied) = denial {
                self.audit(call, &denied, "denied");
                return denied;
            }
            let _permit = match self.scheduler.acquire_tool().await {
                Ok(permit) => permit,
                Err(e) => return ToolResult::error(call, e.to_string()),
            };
            self.run_authorized(call, cancel).await
        });
        join_all(runs).await
    }

    /// 授权阶段：None 表示放行，Some 为拒绝结果
    async fn authorize(&self, call: &ToolCall, cancel: &CancellationToken) -> Option<ToolResult> {
        // 未注册的工具交给注册表返回错误结果
        let spec = self.registry.spec(&call.name)?;
        if !spec.access.requires_approval() {
            return None;
        }
        if cancel.is_cancelled() {
            return Some(ToolResult::error(call, "cancelled before authorization"));
        }
        let request = AuthorizationRequest {
            tool_name: call.name.clone(),
            parameters: call.parameters.clone(),
            reason: approval_reason(&call.name, spec.access, &call.parameters),
            access: spec.access,
        };
        match self.authorizer.authorize(&request, cancel).await {
            Ok(true) => {
                tracing::debug!(tool = %call.name, call_id = %call.id, "tool call approved");
                None
            }
            Ok(false) => {
                tracing::info!(tool = %call.name, call_id = %call.id, "tool call denied");
                Some(ToolResult::error(
                    call,
                    format!(
                        "Permission denied: the user did not approve `{}` ({}). Do not retry the same call; choose another approach or ask the user.",
                        call.name,
                        spec.access.describe()
                    ),
                ))
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %e, "authorization failed, treating as denial");
                Some(ToolResult::error(
                    call,
                    format!("Permission denied: authorization for `{}` failed: {e}", call.name),
                ))
            }
        }
    }

    async fn run_authorized(&self, call: &ToolCall, cancel: &CancellationToken) -> ToolResult {
        if cancel.is_cancelled() {
            let result = ToolResult::error(call, "cancelled before execution");
            self.audit(call, &result, "cancelled");
            return result;
        }
        let limit = self.effective_timeout(call);
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(call.id.clone(), (call.name.clone(), Instant::now()));
        let _guard = ActiveGuard {
            active: &self.active,
            call_id: call.id.clone(),
        };

        let ctx = ToolContext::new(&call.id, &self.working_dir, cancel.child_token());
        let start = Instant::now();
        let (result, outcome) = match timeout(limit, self.registry.execute(&ctx, call)).await {
            Ok(result) if cancel.is_cancelled() && result.is_error() => (result, "cancelled"),
            Ok(result) if result.is_error() => (result, "error"),
            Ok(result) => (result, "ok"),
            Err(_) => {
                ctx.cancel.cancel();
                let result = ToolResult::error(
                    call,
                    format!("Tool `{}` timed out after {}s", call.name, limit.as_secs()),
                )
                .with_duration(start.elapsed());
                (result, "timeout")
            }
        };
        self.audit(call, &result, outcome);
        result
    }

    fn audit(&self, call: &ToolCall, result: &ToolResult, outcome: &str) {
        let duration_ms = result.metadata.as_ref().map(|m| m.duration_ms).unwrap_or(0);
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "call_id": call.id,
            "ok": !result.is_error(),
            "outcome": outcome,
            "duration_ms": duration_ms,
            "args_preview": condense_content(&call.parameters.to_string(), ARGS_PREVIEW_CHARS),
        });
        tracing::info!(audit = %audit.to_string(), "tool");
    }
}
