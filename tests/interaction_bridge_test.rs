//! 交互桥：超时、迟到响应、取消、future 被丢弃，以及经授权闸门的端到端审批

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use hive::interaction::{
    InteractionBridge, InteractionError, InteractionHandler, InteractionRequest, InteractionState,
};
use hive::memory::ToolCall;
use hive::tools::{
    factory, InteractionAuthorizer, ToolAccess, ToolContext, ToolDispatcher, ToolHandler, ToolOutput,
    ToolRegistry, ToolSpec,
};

fn approval() -> InteractionRequest {
    InteractionRequest::Approval {
        tool_name: "shell".into(),
        parameters: json!({"command": "cargo test"}),
        reason: "`shell` runs shell commands".into(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_late_response_is_ignored() {
    let (bridge, mut display_rx) = InteractionBridge::new(Duration::from_secs(120));
    let err = bridge
        .handle_interaction(approval(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, InteractionError::TimedOut(_)));

    let shown = display_rx.try_recv().unwrap();
    assert_eq!(bridge.state(&shown.id), Some(InteractionState::TimedOut));
    // 迟到的响应不阻塞、不改变终态
    assert!(!bridge.handle_approval_response(&shown.id, true));
    assert_eq!(bridge.state(&shown.id), Some(InteractionState::TimedOut));
    assert_eq!(bridge.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_approval_is_a_denial() {
    let (bridge, _display_rx) = InteractionBridge::new(Duration::from_secs(5));
    let approved = bridge
        .request_approval("shell", json!({"command": "ls"}), "runs shell", &CancellationToken::new())
        .await;
    assert!(!approved);
}

#[tokio::test]
async fn test_cancel_unblocks_pending_question() {
    let (bridge, mut display_rx) = InteractionBridge::new(Duration::from_secs(120));
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    let watcher = bridge.clone();
    let frontend = tokio::spawn(async move {
        let shown = display_rx.recv().await.unwrap();
        assert!(watcher.handle_dialog_displayed(&shown.id));
        canceller.cancel();
        shown.id
    });

    let answer = bridge.ask("Which branch?", Some("main"), &cancel).await;
    assert_eq!(answer, "main");
    let id = frontend.await.unwrap();
    assert_eq!(bridge.state(&id), Some(InteractionState::Cancelled));
    assert!(!bridge.handle_answer_response(&id, "dev"));
}

#[tokio::test]
async fn test_dropped_waiter_marks_request_cancelled() {
    let (bridge, mut display_rx) = InteractionBridge::new(Duration::from_secs(120));
    let waited = tokio::time::timeout(
        Duration::from_millis(10),
        bridge.handle_interaction(approval(), &CancellationToken::new()),
    )
    .await;
    assert!(waited.is_err());

    let shown = display_rx.try_recv().unwrap();
    assert_eq!(bridge.state(&shown.id), Some(InteractionState::Cancelled));
    assert_eq!(bridge.pending_count(), 0);
}

#[derive(Clone)]
struct Touch;

#[async_trait::async_trait]
impl ToolHandler for Touch {
    async fn execute(&self, _ctx: &ToolContext, parameters: Value) -> Result<ToolOutput, String> {
        let path = parameters.get("path").and_then(|v| v.as_str()).unwrap_or("?");
        Ok(ToolOutput::text(format!("touched {path}")))
    }
}

#[tokio::test]
async fn test_dispatcher_asks_frontend_for_approval() {
    let (bridge, mut display_rx) = InteractionBridge::new(Duration::from_secs(120));
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolSpec::new("touch", "Create an empty file", ToolAccess::FileWrite),
        factory(Touch),
    );
    let dispatcher = ToolDispatcher::new(
        Arc::new(registry),
        Arc::new(InteractionAuthorizer::new(bridge.clone())),
    );

    let frontend = bridge.clone();
    let answers = tokio::spawn(async move {
        let first = display_rx.recv().await.unwrap();
        assert_eq!(first.title, "Allow `touch`?");
        assert!(first.body.contains("a.txt"));
        frontend.handle_approval_response(&first.id, true);
        let second = display_rx.recv().await.unwrap();
        frontend.handle_approval_response(&second.id, false);
    });

    let cancel = CancellationToken::new();
    let calls = vec![
        ToolCall::new("c1", "touch", json!({"path": "a.txt"})),
        ToolCall::new("c2", "touch", json!({"path": "b.txt"})),
    ];
    let results = dispatcher.execute_batch(&calls, true, &cancel).await;
    answers.await.unwrap();

    assert_eq!(results[0].content(), "touched a.txt");
    assert!(results[1].is_error());
    assert!(results[1].content().starts_with("Permission denied"));
}
