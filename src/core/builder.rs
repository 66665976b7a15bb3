//! Agent 构建器：统一的 Agent 初始化逻辑
//!
//! 按配置组装工具注册表（内置工具 + 调用方工具）、授权器（按交互模式）、调度执行器、
//! 策略、系统提示词、会话存储与 Todo Actor。build 会 spawn Actor，需在 tokio 运行时内调用。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::actor::{
    SessionStoreActor, SessionStoreHandle, TodoChangeCallback, TodoListActor, TodoListHandle,
};
use crate::config::{AppConfig, InteractionMode};
use crate::core::{AgentError, RecoveryEngine};
use crate::interaction::{DisplayMessage, InteractionBridge, InteractionHandler, PolicyInteractionHandler};
use crate::llm::LlmClient;
use crate::memory::{resolve_context_window, Session};
use crate::react::{
    AgentLoop, AggressiveStrategy, ConservativeStrategy, DefaultStrategy, ModelIteration,
    PlanningStrategy, StaticPrompt, Strategy, SystemPromptProvider, DEFAULT_SYSTEM_PROMPT,
};
use crate::tools::{
    register_todo_tools, Authorizer, EchoTool, InteractionAuthorizer, ToolDispatcher,
    ToolFactory, ToolRegistry, ToolSpec,
};

/// Agent 构建器
pub struct AgentBuilder {
    config: AppConfig,
    llm: Arc<dyn LlmClient>,
    interaction: Option<Arc<dyn InteractionHandler>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    tools: Vec<(ToolSpec, ToolFactory)>,
    system_prompt: Option<String>,
    todo_observer: Option<TodoChangeCallback>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            config,
            llm,
            interaction: None,
            authorizer: None,
            tools: Vec::new(),
            system_prompt: None,
            todo_observer: None,
        }
    }

    /// 交互模式下由前端回答审批与提问
    pub fn with_interaction_handler(mut self, handler: Arc<dyn InteractionHandler>) -> Self {
        self.interaction = Some(handler);
        self
    }

    /// 直接指定授权器，忽略交互模式
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    /// 追加调用方工具
    pub fn with_tool(mut self, spec: ToolSpec, factory: ToolFactory) -> Self {
        self.tools.push((spec, factory));
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Todo 列表每次变更后回调（推送给前端）
    pub fn with_todo_observer(mut self, observer: TodoChangeCallback) -> Self {
        self.todo_observer = Some(observer);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn working_dir(&self) -> PathBuf {
        self.config
            .app
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    fn load_system_prompt(&self) -> String {
        if let Some(prompt) = &self.system_prompt {
            return prompt.clone();
        }
        if let Some(path) = &self.config.app.system_prompt_path {
            match std::fs::read_to_string(path) {
                Ok(prompt) => return prompt,
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to read system prompt, using default"
                ),
            }
        }
        DEFAULT_SYSTEM_PROMPT.to_string()
    }

    fn build_authorizer(&self, working_dir: &Path) -> Result<Arc<dyn Authorizer>, AgentError> {
        if let Some(authorizer) = &self.authorizer {
            return Ok(authorizer.clone());
        }
        let handler: Arc<dyn InteractionHandler> = match self.config.interaction.mode {
            InteractionMode::NonInteractive => Arc::new(PolicyInteractionHandler::new(
                &self.config.interaction.policy,
                working_dir,
            )),
            InteractionMode::Interactive => self.interaction.clone().ok_or_else(|| {
                AgentError::Config("interactive mode requires an interaction handler".to_string())
            })?,
        };
        Ok(Arc::new(InteractionAuthorizer::new(handler)))
    }

    /// 组装所有组件
    pub fn build(self) -> Result<AgentComponents, AgentError> {
        let working_dir = self.working_dir();
        let authorizer = self.build_authorizer(&working_dir)?;

        let mut todo_actor = TodoListActor::new();
        if let Some(observer) = &self.todo_observer {
            todo_actor = todo_actor.with_on_change(observer.clone());
        }
        let todos = TodoListHandle::spawn(todo_actor);
        let strategy = strategy_by_name(&self.config.agent.strategy, &todos)?;

        let session_store = SessionStoreHandle::spawn(match &self.config.app.session_dir {
            Some(dir) => SessionStoreActor::with_directory(dir.clone()),
            None => SessionStoreActor::in_memory(),
        });

        let mut registry = ToolRegistry::new();
        EchoTool::register(&mut registry);
        register_todo_tools(&mut registry, &todos);
        let system_prompt = self.load_system_prompt();
        for (spec, factory) in self.tools {
            registry.register(spec, factory);
        }
        tracing::info!(tools = ?registry.tool_names(), "tool registry ready");

        let tools_cfg = &self.config.tools;
        let dispatcher = ToolDispatcher::new(Arc::new(registry), authorizer)
            .with_timeouts(tools_cfg.tool_timeout_secs, tools_cfg.max_tool_timeout_secs)
            .with_max_parallel(tools_cfg.max_parallel_tools)
            .with_working_dir(working_dir);

        let context_window = resolve_context_window(
            self.llm.model_name(),
            self.config.llm.context_window.or(self.llm.context_window()),
        );
        tracing::info!(
            model = self.llm.model_name(),
            context_window,
            strategy = strategy.name(),
            "agent components built"
        );

        Ok(AgentComponents {
            prompt: Arc::new(StaticPrompt::new(system_prompt).with_todos(todos.clone())),
            dispatcher: Arc::new(dispatcher),
            llm: self.llm,
            strategy,
            session_store,
            todos,
            context_window,
            config: self.config,
        })
    }
}

/// 按名称选择策略
pub fn strategy_by_name(name: &str, todos: &TodoListHandle) -> Result<Arc<dyn Strategy>, AgentError> {
    let recovery = RecoveryEngine::new();
    let strategy: Arc<dyn Strategy> = match name.trim().to_lowercase().as_str() {
        "default" => Arc::new(DefaultStrategy::new(recovery)),
        "conservative" => Arc::new(ConservativeStrategy),
        "aggressive" => Arc::new(AggressiveStrategy::new(recovery)),
        "planning" => Arc::new(PlanningStrategy::new(todos.clone(), recovery)),
        other => return Err(AgentError::Config(format!("unknown strategy `{other}`"))),
    };
    Ok(strategy)
}

/// 按配置创建交互桥；接收端交给前端
pub fn interaction_bridge(
    config: &AppConfig,
) -> (Arc<InteractionBridge>, mpsc::UnboundedReceiver<DisplayMessage>) {
    InteractionBridge::new(Duration::from_secs(config.interaction.timeout_secs.max(1)))
}

/// 预构建的 Agent 组件；同一套组件可以创建多个循环
pub struct AgentComponents {
    pub config: AppConfig,
    pub llm: Arc<dyn LlmClient>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub prompt: Arc<dyn SystemPromptProvider>,
    pub strategy: Arc<dyn Strategy>,
    pub session_store: SessionStoreHandle,
    pub todos: TodoListHandle,
    pub context_window: usize,
}

impl AgentComponents {
    pub fn iteration(&self) -> ModelIteration {
        ModelIteration::new(self.llm.clone(), self.dispatcher.clone(), self.prompt.clone())
            .with_sampling(self.config.llm.sampling())
            .with_streaming(self.config.llm.stream)
            .with_parallel_tool_calls(self.config.tools.parallel_tool_calls)
    }

    pub fn agent_loop(&self) -> AgentLoop {
        AgentLoop::new(
            self.config.agent.loop_config(),
            Arc::new(self.iteration()),
            self.strategy.clone(),
        )
    }

    pub fn new_session(&self) -> Session {
        Session::new(self.dispatcher.working_dir().clone())
    }
}
