//! 用户交互层
//!
//! 编排任务中「需要用户回答」的阻塞调用统一走 InteractionHandler：
//! - [`InteractionBridge`]：把请求发给前端（UI / CLI / ACP），等待响应、超时或取消，先到先得；
//! - [`PolicyInteractionHandler`]：非交互模式，按静态白名单同步作答。
//!
//! 失败回退：审批超时/取消视为拒绝，自由文本视为空字符串。

pub mod bridge;
pub mod policy;

pub use bridge::{DisplayMessage, InteractionBridge, DEFAULT_INTERACTION_TIMEOUT};
pub use policy::{InteractionPolicy, PolicyDecision, PolicyInteractionHandler};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Approval,
    Question,
    Questionnaire,
}

/// 问卷中的单个问题
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionItem {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionAnswer {
    pub id: String,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionRequest {
    /// 工具调用审批（是 / 否）
    Approval {
        tool_name: String,
        parameters: Value,
        reason: String,
    },
    /// 单个自由文本问题
    Question {
        prompt: String,
        #[serde(default)]
        default: Option<String>,
    },
    /// 多个结构化问题
    Questionnaire {
        title: String,
        questions: Vec<QuestionItem>,
    },
}

impl InteractionRequest {
    pub fn kind(&self) -> InteractionKind {
        match self {
            InteractionRequest::Approval { .. } => InteractionKind::Approval,
            InteractionRequest::Question { .. } => InteractionKind::Question,
            InteractionRequest::Questionnaire { .. } => InteractionKind::Questionnaire,
        }
    }

    pub fn title(&self) -> String {
        match self {
            InteractionRequest::Approval { tool_name, .. } => format!("Allow `{tool_name}`?"),
            InteractionRequest::Question { prompt, .. } => prompt.clone(),
            InteractionRequest::Questionnaire { title, .. } => title.clone(),
        }
    }

    /// 前端展示正文
    pub fn body(&self) -> String {
        match self {
            InteractionRequest::Approval {
                parameters, reason, ..
            } => format!("{reason}\n{parameters}"),
            InteractionRequest::Question { default, .. } => match default {
                Some(d) => format!("(default: {d})"),
                None => String::new(),
            },
            InteractionRequest::Questionnaire { questions, .. } => questions
                .iter()
                .map(|q| {
                    if q.options.is_empty() {
                        format!("- {}", q.prompt)
                    } else {
                        format!("- {} [{}]", q.prompt, q.options.join(" / "))
                    }
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum InteractionResponse {
    Approval(bool),
    Answer(String),
    Answers(Vec<QuestionAnswer>),
}

impl InteractionResponse {
    pub fn kind(&self) -> InteractionKind {
        match self {
            InteractionResponse::Approval(_) => InteractionKind::Approval,
            InteractionResponse::Answer(_) => InteractionKind::Question,
            InteractionResponse::Answers(_) => InteractionKind::Questionnaire,
        }
    }
}

/// 交互生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionState {
    Pending,
    Displayed,
    Resolved,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteractionError {
    #[error("Interaction {0} timed out")]
    TimedOut(String),

    #[error("Interaction {0} was cancelled")]
    Cancelled(String),

    #[error("No frontend is attached to answer interactions")]
    FrontendUnavailable,
}

/// 交互处理器：审批、提问、问卷共用一套请求/响应机制
#[async_trait]
pub trait InteractionHandler: Send + Sync {
    async fn handle_interaction(
        &self,
        request: InteractionRequest,
        cancel: &CancellationToken,
    ) -> Result<InteractionResponse, InteractionError>;

    /// 请求审批；超时、取消或任何失败都视为拒绝
    async fn request_approval(
        &self,
        tool_name: &str,
        parameters: Value,
        reason: &str,
        cancel: &CancellationToken,
    ) -> bool {
        let request = InteractionRequest::Approval {
            tool_name: tool_name.to_string(),
            parameters,
            reason: reason.to_string(),
        };
        match self.handle_interaction(request, cancel).await {
            Ok(InteractionResponse::Approval(approved)) => approved,
            Ok(other) => {
                tracing::warn!(tool = %tool_name, kind = ?other.kind(), "approval answered with wrong response kind, denying");
                false
            }
            Err(e) => {
                tracing::info!(tool = %tool_name, error = %e, "approval not granted");
                false
            }
        }
    }

    /// 提问；失败时返回默认值或空字符串
    async fn ask(&self, prompt: &str, default: Option<&str>, cancel: &CancellationToken) -> String {
        let request = InteractionRequest::Question {
            prompt: prompt.to_string(),
            default: default.map(str::to_string),
        };
        match self.handle_interaction(request, cancel).await {
            Ok(InteractionResponse::Answer(answer)) => answer,
            Ok(_) | Err(_) => default.unwrap_or_default().to_string(),
        }
    }

    /// 问卷；失败时每个问题回答空字符串
    async fn ask_many(
        &self,
        title: &str,
        questions: Vec<QuestionItem>,
        cancel: &CancellationToken,
    ) -> Vec<QuestionAnswer> {
        let fallback: Vec<QuestionAnswer> = questions
            .iter()
            .map(|q| QuestionAnswer {
                id: q.id.clone(),
                answer: String::new(),
            })
            .collect();
        let request = InteractionRequest::Questionnaire {
            title: title.to_string(),
            questions,
        };
        match self.handle_interaction(request, cancel).await {
            Ok(InteractionResponse::Answers(answers)) => answers,
            Ok(_) | Err(_) => fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl InteractionHandler for Failing {
        async fn handle_interaction(
            &self,
            request: InteractionRequest,
            _cancel: &CancellationToken,
        ) -> Result<InteractionResponse, InteractionError> {
            match request {
                InteractionRequest::Question { .. } => Ok(InteractionResponse::Approval(true)),
                _ => Err(InteractionError::TimedOut("x".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_fallbacks() {
        let cancel = CancellationToken::new();
        assert!(!Failing.request_approval("shell", Value::Null, "", &cancel).await);
        assert_eq!(Failing.ask("name?", None, &cancel).await, "");
        assert_eq!(Failing.ask("name?", Some("hive"), &cancel).await, "hive");
        let answers = Failing
            .ask_many(
                "setup",
                vec![QuestionItem {
                    id: "q1".into(),
                    prompt: "lang?".into(),
                    options: vec![],
                }],
                &cancel,
            )
            .await;
        assert_eq!(answers, vec![QuestionAnswer { id: "q1".into(), answer: String::new() }]);
    }

    #[test]
    fn test_request_rendering() {
        let req = InteractionRequest::Questionnaire {
            title: "Setup".into(),
            questions: vec![QuestionItem {
                id: "q1".into(),
                prompt: "Language?".into(),
                options: vec!["rust".into(), "go".into()],
            }],
        };
        assert_eq!(req.kind(), InteractionKind::Questionnaire);
        assert_eq!(req.body(), "- Language? [rust / go]");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["type"], "questionnaire");
    }
}
