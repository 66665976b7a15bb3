//! 交互桥：异步请求 / 响应
//!
//! handle_interaction 登记一个 PendingInteraction（一次性响应槽 + 展示标记），把 DisplayMessage
//! 发给前端，然后等待「响应 / 超时 / 取消」三者中最先发生的一个。前端通过 handle_* 方法投递结果，
//! 这些方法不阻塞；迟到或未知的投递只记录日志并返回 false。
//! 登记表由 std Mutex 保护，锁从不跨 await 持有。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{
    InteractionError, InteractionHandler, InteractionKind, InteractionRequest, InteractionResponse,
    InteractionState, QuestionAnswer,
};

pub const DEFAULT_INTERACTION_TIMEOUT: Duration = Duration::from_secs(120);

/// 保留的已结束交互状态条数
const FINISHED_HISTORY: usize = 64;

/// 发给前端的展示消息
#[derive(Debug, Clone, Serialize)]
pub struct DisplayMessage {
    pub id: String,
    pub kind: InteractionKind,
    pub title: String,
    pub body: String,
    pub request: InteractionRequest,
}

struct PendingInteraction {
    kind: InteractionKind,
    responder: oneshot::Sender<InteractionResponse>,
    displayed: bool,
}

#[derive(Default)]
struct Ledger {
    pending: HashMap<String, PendingInteraction>,
    finished: VecDeque<(String, InteractionState)>,
}

impl Ledger {
    fn record_finished(&mut self, id: &str, state: InteractionState) {
        self.finished.push_back((id.to_string(), state));
        while self.finished.len() > FINISHED_HISTORY {
            self.finished.pop_front();
        }
    }
}

pub struct InteractionBridge {
    ledger: Mutex<Ledger>,
    display_tx: mpsc::UnboundedSender<DisplayMessage>,
    timeout: Duration,
}

/// 等待方退出（包括 future 被丢弃）时清理登记项
struct PendingGuard<'a> {
    bridge: &'a InteractionBridge,
    id: String,
    armed: bool,
}

impl PendingGuard<'_> {
    /// 以指定终态结束；若响应已先行投递则返回 false
    fn finish(&mut self, state: InteractionState) -> bool {
        self.armed = false;
        let mut ledger = self.bridge.lock();
        if ledger.pending.remove(&self.id).is_some() {
            ledger.record_finished(&self.id, state);
            true
        } else {
            false
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.finish(InteractionState::Cancelled);
        }
    }
}

impl InteractionBridge {
    /// 创建交互桥；返回的接收端交给前端读取展示消息
    pub fn new(timeout: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<DisplayMessage>) {
        let (display_tx, display_rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(Self {
            ledger: Mutex::new(Ledger::default()),
            display_tx,
            timeout,
        });
        (bridge, display_rx)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 查询交互状态；已结束的只保留最近若干条
    pub fn state(&self, id: &str) -> Option<InteractionState> {
        let ledger = self.lock();
        if let Some(p) = ledger.pending.get(id) {
            return Some(if p.displayed {
                InteractionState::Displayed
            } else {
                InteractionState::Pending
            });
        }
        ledger
            .finished
            .iter()
            .rev()
            .find(|(fid, _)| fid == id)
            .map(|(_, state)| *state)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// 前端确认对话框已展示
    pub fn handle_dialog_displayed(&self, id: &str) -> bool {
        let mut ledger = self.lock();
        match ledger.pending.get_mut(id) {
            Some(p) => {
                p.displayed = true;
                true
            }
            None => {
                tracing::debug!(request_id = %id, "display ack for unknown or finished interaction");
                false
            }
        }
    }

    pub fn handle_approval_response(&self, id: &str, approved: bool) -> bool {
        self.deliver(id, InteractionResponse::Approval(approved))
    }

    pub fn handle_answer_response(&self, id: &str, answer: impl Into<String>) -> bool {
        self.deliver(id, InteractionResponse::Answer(answer.into()))
    }

    pub fn handle_questions_response(&self, id: &str, answers: Vec<QuestionAnswer>) -> bool {
        self.deliver(id, InteractionResponse::Answers(answers))
    }

    fn deliver(&self, id: &str, response: InteractionResponse) -> bool {
        let pending = {
            let mut ledger = self.lock();
            match ledger.pending.get(id) {
                None => {
                    tracing::warn!(request_id = %id, "late or unknown interaction response ignored");
                    return false;
                }
                Some(p) if p.kind != response.kind() => {
                    tracing::warn!(
                        request_id = %id,
                        expected = ?p.kind,
                        got = ?response.kind(),
                        "interaction response kind mismatch, still pending"
                    );
                    return false;
                }
                Some(_) => {}
            }
            let Some(pending) = ledger.pending.remove(id) else {
                return false;
            };
            ledger.record_finished(id, InteractionState::Resolved);
            pending
        };
        if pending.responder.send(response).is_err() {
            tracing::debug!(request_id = %id, "interaction waiter already gone");
        }
        true
    }
}

#[async_trait]
impl InteractionHandler for InteractionBridge {
    async fn handle_interaction(
        &self,
        request: InteractionRequest,
        cancel: &CancellationToken,
    ) -> Result<InteractionResponse, InteractionError> {
        let id = uuid::Uuid::new_v4().to_string();
        let kind = request.kind();
        let (responder, mut rx) = oneshot::channel();
        self.lock().pending.insert(
            id.clone(),
            PendingInteraction {
                kind,
                responder,
                displayed: false,
            },
        );
        let mut guard = PendingGuard {
            bridge: self,
            id: id.clone(),
            armed: true,
        };

        let display = DisplayMessage {
            id: id.clone(),
            kind,
            title: request.title(),
            body: request.body(),
            request,
        };
        if self.display_tx.send(display).is_err() {
            guard.finish(InteractionState::Cancelled);
            tracing::warn!(request_id = %id, "no frontend attached, interaction dropped");
            return Err(InteractionError::FrontendUnavailable);
        }
        tracing::info!(request_id = %id, kind = ?kind, "interaction requested");

        let wake = tokio::select! {
            biased;
            response = &mut rx => Wake::Response(response.ok()),
            _ = tokio::time::sleep(self.timeout) => Wake::TimedOut,
            _ = cancel.cancelled() => Wake::Cancelled,
        };

        match wake {
            Wake::Response(Some(response)) => {
                guard.disarm();
                Ok(response)
            }
            Wake::Response(None) => {
                guard.finish(InteractionState::Cancelled);
                Err(InteractionError::Cancelled(id))
            }
            Wake::TimedOut => {
                if guard.finish(InteractionState::TimedOut) {
                    tracing::warn!(request_id = %id, timeout_secs = self.timeout.as_secs(), "interaction timed out");
                    Err(InteractionError::TimedOut(id))
                } else {
                    // 响应与超时同时到达：登记表已记为 Resolved，以响应为准
                    rx.try_recv().map_err(|_| InteractionError::TimedOut(id))
                }
            }
            Wake::Cancelled => {
                if guard.finish(InteractionState::Cancelled) {
                    tracing::info!(request_id = %id, "interaction cancelled");
                    Err(InteractionError::Cancelled(id))
                } else {
                    rx.try_recv().map_err(|_| InteractionError::Cancelled(id))
                }
            }
        }
    }
}

enum Wake {
    Response(Option<InteractionResponse>),
    TimedOut,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approval() -> InteractionRequest {
        InteractionRequest::Approval {
            tool_name: "shell".into(),
            parameters: json!({"command": "cargo test"}),
            reason: "runs shell commands".into(),
        }
    }

    #[tokio::test]
    async fn test_response_resolves_request() {
        let (bridge, mut display_rx) = InteractionBridge::new(Duration::from_secs(5));
        let frontend = bridge.clone();
        let answer = tokio::spawn(async move {
            let msg = display_rx.recv().await.unwrap();
            assert_eq!(frontend.state(&msg.id), Some(InteractionState::Pending));
            assert!(frontend.handle_dialog_displayed(&msg.id));
            assert_eq!(frontend.state(&msg.id), Some(InteractionState::Displayed));
            assert!(frontend.handle_approval_response(&msg.id, true));
            msg.id
        });
        let cancel = CancellationToken::new();
        let response = bridge.handle_interaction(approval(), &cancel).await.unwrap();
        assert_eq!(response, InteractionResponse::Approval(true));
        let id = answer.await.unwrap();
        assert_eq!(bridge.state(&id), Some(InteractionState::Resolved));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_response_keeps_request_pending() {
        let (bridge, mut display_rx) = InteractionBridge::new(Duration::from_secs(5));
        let frontend = bridge.clone();
        tokio::spawn(async move {
            let msg = display_rx.recv().await.unwrap();
            assert!(!frontend.handle_answer_response(&msg.id, "yes"));
            assert_eq!(frontend.state(&msg.id), Some(InteractionState::Pending));
            assert!(frontend.handle_approval_response(&msg.id, false));
        });
        let response = bridge
            .handle_interaction(approval(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(response, InteractionResponse::Approval(false));
    }

    #[tokio::test]
    async fn test_no_frontend() {
        let (bridge, display_rx) = InteractionBridge::new(Duration::from_secs(5));
        drop(display_rx);
        let err = bridge
            .handle_interaction(approval(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, InteractionError::FrontendUnavailable);
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    fn test_unknown_delivery_is_ignored() {
        let (bridge, _rx) = InteractionBridge::new(Duration::from_secs(1));
        assert!(!bridge.handle_approval_response("missing", true));
        assert!(!bridge.handle_dialog_displayed("missing"));
        assert_eq!(bridge.state("missing"), None);
    }
}
