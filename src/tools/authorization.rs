//! 授权闸门
//!
//! 需要审批的工具（写文件 / Shell / 网络）在执行前询问 Authorizer；返回 false 或出错都视为拒绝。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::interaction::{InteractionHandler, InteractionRequest, InteractionResponse};
use crate::tools::ToolAccess;

/// 一次授权请求
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorizationRequest {
    pub tool_name: String,
    pub parameters: Value,
    pub reason: String,
    pub access: ToolAccess,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
        cancel: &CancellationToken,
    ) -> Result<bool, AgentError>;
}

/// 全部放行
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _: &AuthorizationRequest, _: &CancellationToken) -> Result<bool, AgentError> {
        Ok(true)
    }
}

/// 同步闭包授权器
pub struct FnAuthorizer<F>(pub F);

#[async_trait]
impl<F> Authorizer for FnAuthorizer<F>
where
    F: Fn(&AuthorizationRequest) -> Result<bool, AgentError> + Send + Sync,
{
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
        _cancel: &CancellationToken,
    ) -> Result<bool, AgentError> {
        (self.0)(request)
    }
}

/// 把交互处理器（UI 桥或非交互策略）适配为授权器
#[derive(Clone)]
pub struct InteractionAuthorizer {
    handler: Arc<dyn InteractionHandler>,
}

impl InteractionAuthorizer {
    pub fn new(handler: Arc<dyn InteractionHandler>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl Authorizer for InteractionAuthorizer {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
        cancel: &CancellationToken,
    ) -> Result<bool, AgentError> {
        let interaction = InteractionRequest::Approval {
            tool_name: request.tool_name.clone(),
            parameters: request.parameters.clone(),
            reason: request.reason.clone(),
        };
        match self.handler.handle_interaction(interaction, cancel).await? {
            InteractionResponse::Approval(approved) => Ok(approved),
            other => Err(AgentError::Authorization(format!(
                "approval for `{}` was answered with a {:?} response",
                request.tool_name,
                other.kind()
            ))),
        }
    }
}

/// 生成展示给用户的授权理由
pub fn approval_reason(tool_name: &str, access: ToolAccess, parameters: &Value) -> String {
    let target = ["path", "file_path", "command", "url"]
        .iter()
        .find_map(|k| parameters.get(*k).and_then(|v| v.as_str()));
    match target {
        Some(target) => format!("`{tool_name}` {} ({target})", access.describe()),
        None => format!("`{tool_name}` {}", access.describe()),
    }
}
