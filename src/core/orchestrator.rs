//! Agent 编排器：主控任务
//!
//! 建立 cmd / state / progress / results 四条通道，并在后台任务中消费用户命令（Submit/Cancel/Clear/Quit）。
//! 任务运行期间仍然响应 Cancel 与 Quit；每个任务结束后通过会话存储 Actor 保存会话。

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::actor::ActorError;
use crate::core::{AgentError, AgentPhase, AgentComponents, RuntimeSnapshot, SessionSupervisor};
use crate::memory::{Message, Session};
use crate::react::{LoopContext, LoopResult, ProgressKind, ProgressSink, ProgressUpdate};

/// 从前端发往编排器的用户命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 提交用户输入，启动一次任务
    Submit(String),
    /// 取消当前任务
    Cancel,
    /// 清空会话与任务列表
    Clear,
    /// 退出
    Quit,
}

/// create_agent 返回的句柄
pub struct AgentHandle {
    pub commands: mpsc::UnboundedSender<Command>,
    pub state: watch::Receiver<RuntimeSnapshot>,
    pub progress: mpsc::UnboundedReceiver<ProgressUpdate>,
    pub results: mpsc::UnboundedReceiver<LoopResult>,
    task: JoinHandle<()>,
}

impl AgentHandle {
    pub fn send(&self, command: Command) -> Result<(), AgentError> {
        self.commands
            .send(command)
            .map_err(|_| AgentError::Actor(ActorError::MailboxClosed("orchestrator")))
    }

    pub fn submit(&self, input: impl Into<String>) -> Result<(), AgentError> {
        self.send(Command::Submit(input.into()))
    }

    pub fn cancel(&self) -> Result<(), AgentError> {
        self.send(Command::Cancel)
    }

    pub fn snapshot(&self) -> RuntimeSnapshot {
        self.state.borrow().clone()
    }

    /// 等待下一个任务结果
    pub async fn next_result(&mut self) -> Option<LoopResult> {
        self.results.recv().await
    }

    /// 发送 Quit 并等待后台任务退出
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Quit);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "orchestrator task failed");
        }
    }
}

struct Runtime {
    components: AgentComponents,
    supervisor: SessionSupervisor,
    state_tx: watch::Sender<RuntimeSnapshot>,
    progress_out: mpsc::UnboundedSender<ProgressUpdate>,
    results_tx: mpsc::UnboundedSender<LoopResult>,
}

impl Runtime {
    fn publish(&self, session: &Session, phase: AgentPhase, iteration: usize) {
        self.state_tx.send_modify(|s| {
            s.phase = phase;
            s.session_id = session.id.clone();
            s.iteration = iteration;
            s.message_count = session.len();
        });
    }

    /// 转发进度并据此更新阶段
    fn forward(&self, update: ProgressUpdate, iteration: &mut usize) {
        let phase = match update.kind {
            ProgressKind::IterationStarted => {
                *iteration += 1;
                Some(AgentPhase::Thinking)
            }
            ProgressKind::Thinking => Some(AgentPhase::Thinking),
            ProgressKind::ToolCall => Some(AgentPhase::ToolExecuting),
            ProgressKind::Compaction => Some(AgentPhase::Compacting),
            _ => None,
        };
        let current = *iteration;
        self.state_tx.send_modify(|s| {
            if let Some(phase) = phase {
                s.phase = phase;
            }
            s.iteration = current;
        });
        let _ = self.progress_out.send(update);
    }

    async fn save(&self, session: &Session) {
        if let Err(e) = self.components.session_store.save(session, None).await {
            tracing::warn!(session_id = %session.id, error = %e, "failed to save session");
        }
    }
}

/// 创建 Agent 运行时：后台任务消费命令，驱动编排循环并发布状态快照
pub fn create_agent(components: AgentComponents) -> AgentHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (state_tx, state_rx) = watch::channel(RuntimeSnapshot::default());
    let (progress_out, progress_rx_out) = mpsc::unbounded_channel();
    let (results_tx, results_rx) = mpsc::unbounded_channel();
    let (sink, mut progress_rx) = ProgressSink::channel();

    let runtime = Runtime {
        components,
        supervisor: SessionSupervisor::new(),
        state_tx,
        progress_out,
        results_tx,
    };

    let task = tokio::spawn(async move {
        let agent_loop = runtime.components.agent_loop();
        let mut session = runtime.components.new_session();
        runtime.publish(&session, AgentPhase::Idle, 0);
        tracing::info!(session_id = %session.id, "orchestrator started");

        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Submit(input) => {
                    if let Err(e) = session.push(Message::user(input)) {
                        tracing::warn!(error = %e, "rejected user input");
                        continue;
                    }
                    let cancel = runtime.supervisor.begin_task();
                    let mut ctx = LoopContext::new(session, runtime.components.context_window)
                        .with_progress(sink.clone())
                        .with_cancel(cancel);
                    runtime.publish(&ctx.session, AgentPhase::Thinking, 0);

                    let mut iteration = 0usize;
                    let mut quit = false;
                    let result = {
                        let run = agent_loop.run(&mut ctx);
                        tokio::pin!(run);
                        loop {
                            tokio::select! {
                                result = &mut run => break result,
                                Some(update) = progress_rx.recv() => runtime.forward(update, &mut iteration),
                                cmd = cmd_rx.recv(), if !quit => match cmd {
                                    Some(Command::Cancel) => runtime.supervisor.cancel(),
                                    Some(Command::Quit) | None => {
                                        runtime.supervisor.cancel();
                                        quit = true;
                                    }
                                    Some(other) => {
                                        tracing::warn!(command = ?other, "task in progress, command ignored");
                                    }
                                },
                            }
                        }
                    };
                    while let Ok(update) = progress_rx.try_recv() {
                        runtime.forward(update, &mut iteration);
                    }

                    session = ctx.session;
                    runtime.save(&session).await;
                    let phase = if result.success {
                        AgentPhase::Finished
                    } else {
                        AgentPhase::Error
                    };
                    runtime.publish(&session, phase, result.iterations_executed);
                    runtime
                        .state_tx
                        .send_modify(|s| s.last_result = Some(result.clone()));
                    let _ = runtime.results_tx.send(result);
                    if quit {
                        break;
                    }
                }
                Command::Cancel => {
                    tracing::debug!("no task in progress to cancel");
                }
                Command::Clear => {
                    session.clear();
                    if let Err(e) = runtime.components.todos.clear().await {
                        tracing::warn!(error = %e, "failed to clear todo list");
                    }
                    runtime.state_tx.send_modify(|s| s.last_result = None);
                    runtime.publish(&session, AgentPhase::Idle, 0);
                }
                Command::Quit => break,
            }
        }

        runtime.supervisor.shutdown();
        tracing::info!(session_id = %session.id, "orchestrator stopped");
    });

    AgentHandle {
        commands: cmd_tx,
        state: state_rx,
        progress: progress_rx_out,
        results: results_rx,
        task,
    }
}
