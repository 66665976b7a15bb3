//! 单轮迭代：构建请求 -> 调用模型 -> 分发工具调用 -> 追加工具消息
//!
//! Iteration 只关心「一轮里做什么」，停止 / 续跑 / 压缩的判断留给 AgentLoop 与 Strategy。

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, OrchestratorState};
use crate::llm::{Completion, CompletionRequest, LlmClient, LlmError, SamplingParams, StreamChunk};
use crate::memory::{condense_content, Session, ToolCall};
use crate::react::{ProgressKind, ProgressSink, ProgressUpdate, SystemPromptProvider};
use crate::tools::{ToolAccess, ToolDispatcher, ToolResult};

const PATH_KEYS: &[&str] = &["path", "file_path"];
const RESULT_PREVIEW_CHARS: usize = 200;

/// 一轮迭代的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationOutcome {
    /// 执行了工具调用，进入下一轮
    Continue,
    /// 模型给出了没有工具调用的回答
    Answer(String),
    /// 迭代主动要求结束
    Break,
}

/// 循环运行期间的可变上下文；会话在任务期间只由循环持有
pub struct LoopContext {
    pub session: Session,
    pub state: OrchestratorState,
    pub progress: ProgressSink,
    pub cancel: CancellationToken,
    pub context_window: usize,
}

impl LoopContext {
    pub fn new(session: Session, context_window: usize) -> Self {
        Self {
            session,
            state: OrchestratorState::default(),
            progress: ProgressSink::disabled(),
            cancel: CancellationToken::new(),
            context_window,
        }
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[async_trait]
pub trait Iteration: Send + Sync {
    async fn run(&self, ctx: &mut LoopContext) -> Result<IterationOutcome, AgentError>;
}

/// 默认迭代：模型调用 + 工具分发
pub struct ModelIteration {
    llm: Arc<dyn LlmClient>,
    dispatcher: Arc<ToolDispatcher>,
    prompt: Arc<dyn SystemPromptProvider>,
    sampling: SamplingParams,
    stream: bool,
    parallel_tool_calls: bool,
}

impl ModelIteration {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        dispatcher: Arc<ToolDispatcher>,
        prompt: Arc<dyn SystemPromptProvider>,
    ) -> Self {
        Self {
            llm,
            dispatcher,
            prompt,
            sampling: SamplingParams::default(),
            stream: false,
            parallel_tool_calls: false,
        }
    }

    pub fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_parallel_tool_calls(mut self, parallel: bool) -> Self {
        self.parallel_tool_calls = parallel;
        self
    }

    async fn request(
        &self,
        request: &CompletionRequest,
        progress: &ProgressSink,
    ) -> Result<Completion, LlmError> {
        if !self.stream {
            return self.llm.complete_with_request(request).await;
        }
        let progress = progress.clone();
        let mut on_chunk = move |chunk: StreamChunk| match chunk {
            StreamChunk::Text(text) => progress.emit(ProgressUpdate::stream(text)),
        };
        self.llm.stream(request, &mut on_chunk).await
    }

    /// 成功的读写类工具调用记入会话的文件集合
    fn record_files(&self, session: &mut Session, call: &ToolCall, result: &ToolResult) {
        if result.is_error() {
            return;
        }
        let Some(access) = self.dispatcher.registry().spec(&call.name).map(|s| s.access) else {
            return;
        };
        let Some(raw) = PATH_KEYS
            .iter()
            .find_map(|k| call.parameters.get(*k).and_then(|v| v.as_str()))
        else {
            return;
        };
        let path: PathBuf = self.dispatcher.working_dir().join(raw);
        match access {
            ToolAccess::ReadOnly => session.record_file_read(path),
            ToolAccess::FileWrite => session.record_file_modified(path),
            _ => {}
        }
    }
}

#[async_trait]
impl Iteration for ModelIteration {
    async fn run(&self, ctx: &mut LoopContext) -> Result<IterationOutcome, AgentError> {
        let request = CompletionRequest {
            system_prompt: self.prompt.system_prompt().await,
            messages: ctx.session.messages().to_vec(),
            tools: self.dispatcher.registry().to_json_schema(),
            sampling: self.sampling.clone(),
        };
        ctx.progress
            .emit(ProgressUpdate::status(ProgressKind::Thinking, "Thinking..."));

        let mut completion = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(AgentError::Cancelled),
            result = self.request(&request, &ctx.progress) => result?,
        };
        ctx.session.record_usage(&completion.usage);
        ctx.state.last_prompt_tokens = completion.usage.prompt_tokens as usize;

        if completion.tool_calls.is_empty() {
            ctx.session.push(completion.to_assistant_message())?;
            ctx.progress.emit(ProgressUpdate::log(
                ProgressKind::Answer,
                completion.content.clone(),
            ));
            return Ok(IterationOutcome::Answer(completion.content));
        }

        for call in &mut completion.tool_calls {
            if call.id.trim().is_empty() {
                call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
            }
        }
        ctx.session.push(completion.to_assistant_message())?;
        let calls = completion.tool_calls;

        // 同一批次内的重复调用只记一次
        let mut seen = HashSet::new();
        let batch: Vec<String> = calls
            .iter()
            .map(ToolCall::signature)
            .filter(|signature| seen.insert(signature.clone()))
            .collect();
        ctx.state.loop_detector.record_batch(batch);
        for call in &calls {
            ctx.progress.emit(ProgressUpdate::status(
                ProgressKind::ToolCall,
                format!("Running `{}`", call.name),
            ));
        }

        let results = self
            .dispatcher
            .execute_batch(&calls, self.parallel_tool_calls, &ctx.cancel)
            .await;
        for (call, result) in calls.iter().zip(&results) {
            self.record_files(&mut ctx.session, call, result);
            ctx.progress.emit(ProgressUpdate::log(
                ProgressKind::ToolResult,
                format!(
                    "{} -> {}",
                    call.name,
                    condense_content(&result.to_message().content, RESULT_PREVIEW_CHARS)
                ),
            ));
            ctx.session.push(result.to_message())?;
        }

        if ctx.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(IterationOutcome::Continue)
    }
}
