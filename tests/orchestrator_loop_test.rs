//! 编排循环端到端场景：轮次上限、授权拒绝、循环检测、压缩、自动续跑、重试与取消

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use hive::core::AgentError;
use hive::interaction::{InteractionBridge, InteractionState};
use hive::llm::{Completion, CompletionRequest, LlmClient, LlmError, ScriptedLlmClient};
use hive::memory::compaction::SUMMARY_HEADER;
use hive::memory::{Message, Role, Session, TaskOutcome, ToolCall};
use hive::react::{
    AgentLoop, ConservativeStrategy, DefaultStrategy, FailureReason, Iteration, IterationOutcome,
    LoopConfig, LoopContext, LoopStatus, ModelIteration, ProgressKind, ProgressSink, StaticPrompt,
    Strategy,
};
use hive::tools::{
    factory, AllowAll, AuthorizationRequest, Authorizer, EchoTool, FnAuthorizer,
    InteractionAuthorizer, ToolAccess, ToolContext, ToolDispatcher, ToolHandler, ToolOutput,
    ToolRegistry, ToolSpec,
};

/// 在指定轮次返回 Break，其余轮次返回 Continue
struct BreakAt(usize);

#[async_trait]
impl Iteration for BreakAt {
    async fn run(&self, ctx: &mut LoopContext) -> Result<IterationOutcome, AgentError> {
        if ctx.state.iteration == self.0 {
            Ok(IterationOutcome::Break)
        } else {
            Ok(IterationOutcome::Continue)
        }
    }
}

struct AnswerOnce;

#[async_trait]
impl Iteration for AnswerOnce {
    async fn run(&self, _ctx: &mut LoopContext) -> Result<IterationOutcome, AgentError> {
        Ok(IterationOutcome::Answer("ok".into()))
    }
}

/// 奇数轮给出未完成的回答，偶数轮执行工具（Continue）
struct AnswerThenWork;

#[async_trait]
impl Iteration for AnswerThenWork {
    async fn run(&self, ctx: &mut LoopContext) -> Result<IterationOutcome, AgentError> {
        if ctx.state.iteration % 2 == 1 {
            Ok(IterationOutcome::Answer("Let me keep going...".into()))
        } else {
            Ok(IterationOutcome::Continue)
        }
    }
}

/// 每轮向会话追加一条约 450 token 的消息，在指定轮次结束
struct GrowingContext {
    break_at: usize,
}

#[async_trait]
impl Iteration for GrowingContext {
    async fn run(&self, ctx: &mut LoopContext) -> Result<IterationOutcome, AgentError> {
        if ctx.state.iteration == self.break_at {
            return Ok(IterationOutcome::Break);
        }
        ctx.session.push(Message::assistant("word ".repeat(360)))?;
        Ok(IterationOutcome::Continue)
    }
}

/// 记录是否真的产生了副作用
#[derive(Clone)]
struct RecordingWriter {
    wrote: Arc<AtomicBool>,
}

#[async_trait]
impl ToolHandler for RecordingWriter {
    async fn execute(&self, _ctx: &ToolContext, _parameters: Value) -> Result<ToolOutput, String> {
        self.wrote.store(true, Ordering::SeqCst);
        Ok(ToolOutput::text("written"))
    }
}

#[derive(Clone)]
struct SlowTool;

#[async_trait]
impl ToolHandler for SlowTool {
    async fn execute(&self, _ctx: &ToolContext, parameters: Value) -> Result<ToolOutput, String> {
        let ms = parameters.get("ms").and_then(|v| v.as_u64()).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ToolOutput::text(format!("slept {ms}ms")))
    }
}

struct HangingLlm;

#[async_trait]
impl LlmClient for HangingLlm {
    fn model_name(&self) -> &str {
        "hanging"
    }

    async fn complete_with_request(&self, _request: &CompletionRequest) -> Result<Completion, LlmError> {
        std::future::pending::<Result<Completion, LlmError>>().await
    }
}

fn session_with_task(task: &str) -> Session {
    let mut session = Session::new("/work/project");
    session.push(Message::user(task)).unwrap();
    session
}

fn model_loop(
    config: LoopConfig,
    llm: Arc<dyn LlmClient>,
    registry: ToolRegistry,
    authorizer: Arc<dyn Authorizer>,
    strategy: Arc<dyn Strategy>,
    parallel: bool,
) -> AgentLoop {
    let dispatcher = ToolDispatcher::new(Arc::new(registry), authorizer).with_working_dir("/work/project");
    let iteration = ModelIteration::new(llm, Arc::new(dispatcher), Arc::new(StaticPrompt::default()))
        .with_parallel_tool_calls(parallel);
    AgentLoop::new(config, Arc::new(iteration), strategy)
}

fn echo_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    EchoTool::register(&mut registry);
    registry
}

#[tokio::test]
async fn test_break_on_last_allowed_iteration() {
    let config = LoopConfig {
        max_iterations: 3,
        ..LoopConfig::default()
    };
    let agent = AgentLoop::new(config, Arc::new(BreakAt(3)), Arc::new(DefaultStrategy::default()));
    let mut ctx = LoopContext::new(session_with_task("task"), 100_000);
    let result = agent.run(&mut ctx).await;
    assert_eq!(result.iterations_executed, 3);
    assert!(result.success);
    assert_eq!(result.status, LoopStatus::Completed);
}

#[tokio::test]
async fn test_iteration_ceiling_fails_with_reason() {
    let config = LoopConfig {
        max_iterations: 4,
        ..LoopConfig::default()
    };
    let agent = AgentLoop::new(config, Arc::new(BreakAt(usize::MAX)), Arc::new(DefaultStrategy::default()));
    let mut ctx = LoopContext::new(session_with_task("task"), 100_000);
    let result = agent.run(&mut ctx).await;
    assert_eq!(
        result.status,
        LoopStatus::Failed(FailureReason::MaxIterationsReached(4))
    );
    assert_eq!(result.iterations_executed, 4);
    assert!(!result.success);
    assert!(result.reason.contains("4 iterations"));
    assert_eq!(ctx.session.summary.unwrap().outcome, TaskOutcome::Failed);
}

#[tokio::test]
async fn test_denied_gated_tools_while_read_only_tools_run() {
    let wrote = Arc::new(AtomicBool::new(false));
    let mut registry = echo_registry();
    registry.register(
        ToolSpec::new("write_file", "Write a file", ToolAccess::FileWrite),
        factory(RecordingWriter { wrote: wrote.clone() }),
    );
    let deny_all = FnAuthorizer(|_req: &AuthorizationRequest| Ok::<bool, AgentError>(false));
    let llm = Arc::new(
        ScriptedLlmClient::new("scripted")
            .then(Completion::with_tool_calls(
                "",
                vec![
                    ToolCall::new("c1", "write_file", json!({"path": "out.txt", "text": "x"})),
                    ToolCall::new("c2", "echo", json!({"text": "hi"})),
                ],
            ))
            .then(Completion::text("finished")),
    );
    let agent = model_loop(
        LoopConfig::default(),
        llm.clone(),
        registry,
        Arc::new(deny_all),
        Arc::new(ConservativeStrategy),
        false,
    );
    let mut ctx = LoopContext::new(session_with_task("write and echo"), 100_000);
    let result = agent.run(&mut ctx).await;

    assert!(result.success);
    assert_eq!(result.iterations_executed, 2);
    assert_eq!(result.response.as_deref(), Some("finished"));
    assert!(!wrote.load(Ordering::SeqCst));

    let messages = ctx.session.messages();
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[2].tool_id.as_deref(), Some("c1"));
    assert!(messages[2].content.starts_with("Error: Permission denied"));
    assert_eq!(messages[3].tool_id.as_deref(), Some("c2"));
    assert!(!messages[3].content.starts_with("Error"));

    let requests = llm.requests();
    assert_eq!(requests.len(), 2);
    let tool_names: Vec<&str> = requests[0].tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(tool_names, vec!["echo", "write_file"]);
    assert_eq!(requests[1].messages.len(), 4);
}

#[tokio::test]
async fn test_repeated_tool_call_is_detected() {
    let call = |id: &str| ToolCall::new(id, "echo", json!({"text": "again"}));
    let llm = Arc::new(
        ScriptedLlmClient::new("scripted")
            .then(Completion::with_tool_calls("", vec![call("c1")]))
            .then(Completion::with_tool_calls("", vec![call("c2")]))
            .then(Completion::with_tool_calls("", vec![call("c3")]))
            .then(Completion::text("unreachable")),
    );
    let agent = model_loop(
        LoopConfig::default(),
        llm.clone(),
        echo_registry(),
        Arc::new(AllowAll),
        Arc::new(DefaultStrategy::default()),
        false,
    );
    let mut ctx = LoopContext::new(session_with_task("loop"), 100_000);
    let result = agent.run(&mut ctx).await;

    let LoopStatus::LoopDetected(signature) = &result.status else {
        panic!("expected loop detection, got {:?}", result.status);
    };
    assert!(signature.contains("echo"));
    assert_eq!(result.iterations_executed, 3);
    assert!(!result.success);
    assert_eq!(llm.remaining(), 1);
    assert_eq!(ctx.session.summary.unwrap().outcome, TaskOutcome::LoopDetected);
}

#[tokio::test]
async fn test_repeat_detected_alongside_changing_calls() {
    let mut llm = ScriptedLlmClient::new("scripted");
    for i in 0..3 {
        llm = llm.then(Completion::with_tool_calls(
            "",
            vec![
                ToolCall::new(format!("a{i}"), "echo", json!({"text": "status"})),
                ToolCall::new(format!("b{i}"), "echo", json!({"text": format!("page {i}")})),
            ],
        ));
    }
    let llm = Arc::new(llm.then(Completion::text("unreachable")));
    let agent = model_loop(
        LoopConfig::default(),
        llm.clone(),
        echo_registry(),
        Arc::new(AllowAll),
        Arc::new(DefaultStrategy::default()),
        false,
    );
    let mut ctx = LoopContext::new(session_with_task("paginate"), 100_000);
    let result = agent.run(&mut ctx).await;

    let LoopStatus::LoopDetected(signature) = &result.status else {
        panic!("expected loop detection, got {:?}", result.status);
    };
    assert!(signature.contains("status"));
    assert_eq!(result.iterations_executed, 3);
    assert_eq!(llm.remaining(), 1);
}

#[tokio::test]
async fn test_compaction_replaces_prefix_with_summary() {
    let mut session = Session::new("/work/project");
    let text = "word ".repeat(32);
    for i in 0..10 {
        let msg = if i % 2 == 0 {
            Message::user(text.clone())
        } else {
            Message::assistant(text.clone())
        };
        session.push(msg).unwrap();
    }
    let config = LoopConfig {
        condensed_message_chars: 20,
        ..LoopConfig::default()
    };
    let agent = AgentLoop::new(config, Arc::new(AnswerOnce), Arc::new(ConservativeStrategy));
    let mut ctx = LoopContext::new(session, 400);
    let result = agent.run(&mut ctx).await;

    assert!(result.success);
    let messages = ctx.session.messages();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].role, Role::System);
    assert!(messages[0].content.starts_with(SUMMARY_HEADER));
    assert!(ctx.session.estimated_tokens() < 320);
}

#[tokio::test]
async fn test_context_can_grow_again_after_effective_compaction() {
    let config = LoopConfig {
        compaction_keep_recent: 0,
        condensed_message_chars: 20,
        ..LoopConfig::default()
    };
    let agent = AgentLoop::new(
        config,
        Arc::new(GrowingContext { break_at: 6 }),
        Arc::new(DefaultStrategy::default()),
    );
    let (sink, mut progress) = ProgressSink::channel();
    let mut ctx = LoopContext::new(session_with_task("grow"), 500).with_progress(sink);
    let result = agent.run(&mut ctx).await;

    assert_eq!(result.status, LoopStatus::Completed);
    assert_eq!(result.iterations_executed, 6);
    let mut compactions = 0;
    while let Ok(update) = progress.try_recv() {
        if update.kind == ProgressKind::Compaction {
            compactions += 1;
        }
    }
    // 第 2 到第 6 轮之前各压缩一次，超过连续压缩上限 3 也不失败
    assert_eq!(compactions, 5);
    assert_eq!(ctx.session.messages()[0].role, Role::System);
    assert!(ctx.session.estimated_tokens() < 400);
}

#[tokio::test]
async fn test_uncompactable_context_fails() {
    let agent = AgentLoop::new(
        LoopConfig::default(),
        Arc::new(BreakAt(usize::MAX)),
        Arc::new(DefaultStrategy::default()),
    );
    let mut ctx = LoopContext::new(session_with_task(&"x".repeat(400)), 10);
    let result = agent.run(&mut ctx).await;
    assert!(matches!(
        result.status,
        LoopStatus::Failed(FailureReason::ContextBudgetExceeded(_))
    ));
    assert_eq!(result.iterations_executed, 3);
}

#[tokio::test]
async fn test_auto_continue_on_incomplete_answer() {
    let llm = Arc::new(
        ScriptedLlmClient::new("scripted")
            .then(Completion::text("Here is the plan:"))
            .then(Completion::text("All tests pass.")),
    );
    let agent = model_loop(
        LoopConfig::default(),
        llm,
        ToolRegistry::new(),
        Arc::new(AllowAll),
        Arc::new(DefaultStrategy::default()),
        false,
    );
    let mut ctx = LoopContext::new(session_with_task("fix the tests"), 100_000);
    let result = agent.run(&mut ctx).await;

    assert!(result.success);
    assert_eq!(result.iterations_executed, 2);
    assert_eq!(result.response.as_deref(), Some("All tests pass."));
    let roles: Vec<Role> = ctx.session.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
}

#[tokio::test]
async fn test_auto_continue_is_bounded() {
    let mut llm = ScriptedLlmClient::new("scripted");
    for _ in 0..6 {
        llm = llm.then(Completion::text("Working on it..."));
    }
    let llm = Arc::new(llm);
    let agent = model_loop(
        LoopConfig::default(),
        llm.clone(),
        ToolRegistry::new(),
        Arc::new(AllowAll),
        Arc::new(DefaultStrategy::default()),
        false,
    );
    let mut ctx = LoopContext::new(session_with_task("go"), 100_000);
    let result = agent.run(&mut ctx).await;
    assert!(result.success);
    assert_eq!(result.iterations_executed, 4);
    assert_eq!(llm.remaining(), 2);
}

#[tokio::test]
async fn test_auto_continue_limit_counts_consecutive_attempts() {
    let config = LoopConfig {
        max_iterations: 7,
        max_auto_continue_attempts: 1,
        ..LoopConfig::default()
    };
    let agent = AgentLoop::new(config, Arc::new(AnswerThenWork), Arc::new(DefaultStrategy::default()));
    let mut ctx = LoopContext::new(session_with_task("keep working"), 100_000);
    let result = agent.run(&mut ctx).await;

    assert_eq!(result.status, LoopStatus::Completed);
    assert_eq!(result.iterations_executed, 7);
    assert_eq!(result.response.as_deref(), Some("Let me keep going..."));
    // 第 1、3、5 轮的回答各续跑一次，第 7 轮到达轮次上限
    let continues = ctx
        .session
        .messages()
        .iter()
        .filter(|m| m.role == Role::User)
        .count();
    assert_eq!(continues, 4);
}

#[tokio::test(start_paused = true)]
async fn test_transient_error_is_retried() {
    let llm = Arc::new(
        ScriptedLlmClient::new("scripted")
            .then_error(LlmError::Timeout)
            .then(Completion::text("Recovered.")),
    );
    let agent = model_loop(
        LoopConfig::default(),
        llm,
        ToolRegistry::new(),
        Arc::new(AllowAll),
        Arc::new(DefaultStrategy::default()),
        false,
    );
    let mut ctx = LoopContext::new(session_with_task("go"), 100_000);
    let result = agent.run(&mut ctx).await;
    assert!(result.success);
    assert_eq!(result.iterations_executed, 2);
    assert_eq!(result.response.as_deref(), Some("Recovered."));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_results_keep_declared_order() {
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolSpec::new("slow", "Sleep for `ms` milliseconds", ToolAccess::ReadOnly),
        factory(SlowTool),
    );
    let llm = Arc::new(
        ScriptedLlmClient::new("scripted")
            .then(Completion::with_tool_calls(
                "",
                vec![
                    ToolCall::new("c1", "slow", json!({"ms": 300})),
                    ToolCall::new("c2", "slow", json!({"ms": 10})),
                ],
            ))
            .then(Completion::text("ok")),
    );
    let agent = model_loop(
        LoopConfig::default(),
        llm,
        registry,
        Arc::new(AllowAll),
        Arc::new(ConservativeStrategy),
        true,
    );
    let mut ctx = LoopContext::new(session_with_task("sleep twice"), 100_000);
    let result = agent.run(&mut ctx).await;
    assert!(result.success);

    let messages = ctx.session.messages();
    assert_eq!(messages[2].tool_id.as_deref(), Some("c1"));
    assert_eq!(messages[2].content, "slept 300ms");
    assert_eq!(messages[3].tool_id.as_deref(), Some("c2"));
}

#[tokio::test]
async fn test_cancel_interrupts_model_call() {
    let agent = model_loop(
        LoopConfig::default(),
        Arc::new(HangingLlm),
        ToolRegistry::new(),
        Arc::new(AllowAll),
        Arc::new(DefaultStrategy::default()),
        false,
    );
    let mut ctx = LoopContext::new(session_with_task("hang"), 100_000);
    let token = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    let result = agent.run(&mut ctx).await;
    assert_eq!(result.status, LoopStatus::Cancelled);
    assert_eq!(result.iterations_executed, 1);
    assert_eq!(ctx.session.summary.unwrap().outcome, TaskOutcome::Cancelled);
}

#[tokio::test]
async fn test_cancel_unblocks_pending_tool_approval() {
    let (bridge, mut display_rx) = InteractionBridge::new(Duration::from_secs(120));
    let wrote = Arc::new(AtomicBool::new(false));
    let mut registry = ToolRegistry::new();
    registry.register(
        ToolSpec::new("write_file", "Write a file", ToolAccess::FileWrite),
        factory(RecordingWriter { wrote: wrote.clone() }),
    );
    let llm = Arc::new(ScriptedLlmClient::new("scripted").then(Completion::with_tool_calls(
        "",
        vec![ToolCall::new("c1", "write_file", json!({"path": "out.txt", "text": "x"}))],
    )));
    let agent = model_loop(
        LoopConfig::default(),
        llm.clone(),
        registry,
        Arc::new(InteractionAuthorizer::new(bridge.clone())),
        Arc::new(DefaultStrategy::default()),
        false,
    );
    let mut ctx = LoopContext::new(session_with_task("write it"), 100_000);

    // 前端看到审批对话框后不作答，直接取消任务
    let token = ctx.cancel.clone();
    let frontend = tokio::spawn(async move {
        let shown = display_rx.recv().await.unwrap();
        token.cancel();
        shown.id
    });
    let result = agent.run(&mut ctx).await;
    let id = frontend.await.unwrap();

    assert_eq!(result.status, LoopStatus::Cancelled);
    assert_eq!(result.iterations_executed, 1);
    assert!(!wrote.load(Ordering::SeqCst));
    assert_eq!(bridge.state(&id), Some(InteractionState::Cancelled));
    assert_eq!(bridge.pending_count(), 0);
    let messages = ctx.session.messages();
    assert_eq!(messages[2].tool_id.as_deref(), Some("c1"));
    assert!(messages[2].content.starts_with("Error: Permission denied"));
    assert_eq!(llm.remaining(), 0);
}
