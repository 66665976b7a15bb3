//! Actor 并发基座：单写者实体 + 有序邮箱
//!
//! 每个 Actor 独占私有状态，由自己的处理任务按入队顺序逐条处理请求；外部只能通过 [`ActorRef`]
//! 发送请求并等待类型化响应。处理任务结束后（panic 或 close），挂起与后续的 send 均返回
//! [`ActorError::MailboxClosed`]，调用方不应再对同一引用重试。

pub mod session_store;
pub mod todo;

pub use session_store::{SessionInfo, SessionStoreActor, SessionStoreHandle};
pub use todo::{
    render_todos, TodoChangeCallback, TodoDraft, TodoItem, TodoListActor, TodoListHandle, TodoStatus,
};

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// 默认邮箱容量
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActorError {
    #[error("Mailbox closed: actor '{0}' is no longer running")]
    MailboxClosed(&'static str),
}

/// Actor：私有状态 + 请求处理
#[async_trait]
pub trait Actor: Send + 'static {
    type Request: Send + 'static;
    type Response: Send + 'static;

    fn name(&self) -> &'static str;

    /// 处理单个请求；同一 Actor 的请求不会并发执行
    async fn handle(&mut self, request: Self::Request) -> Self::Response;

    /// close 时在排空邮箱后调用
    async fn on_stop(&mut self) {}
}

enum Envelope<A: Actor> {
    Request {
        request: A::Request,
        reply: oneshot::Sender<A::Response>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
}

/// Actor 引用：可克隆，向邮箱投递请求
pub struct ActorRef<A: Actor> {
    tx: mpsc::Sender<Envelope<A>>,
    name: &'static str,
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            name: self.name,
        }
    }
}

impl<A: Actor> fmt::Debug for ActorRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorRef")
            .field("name", &self.name)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<A: Actor> ActorRef<A> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 发送请求并等待响应；只阻塞调用方
    pub async fn send(&self, request: A::Request) -> Result<A::Response, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Request { request, reply })
            .await
            .map_err(|_| ActorError::MailboxClosed(self.name))?;
        rx.await.map_err(|_| ActorError::MailboxClosed(self.name))
    }

    /// 停止 Actor：先处理已入队的请求，再调用 on_stop；返回时处理任务已结束
    pub async fn close(&self) -> Result<(), ActorError> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Stop { done })
            .await
            .map_err(|_| ActorError::MailboxClosed(self.name))?;
        rx.await.map_err(|_| ActorError::MailboxClosed(self.name))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// 以默认邮箱容量启动 Actor（需在 tokio 运行时内调用）
pub fn spawn<A: Actor>(actor: A) -> ActorRef<A> {
    spawn_with_capacity(actor, DEFAULT_MAILBOX_CAPACITY)
}

pub fn spawn_with_capacity<A: Actor>(actor: A, capacity: usize) -> ActorRef<A> {
    let name = actor.name();
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run_actor(actor, rx));
    // 监视任务：处理任务 panic 时记录错误，邮箱随之关闭
    tokio::spawn(async move {
        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::error!(actor = name, "actor task panicked, mailbox closed");
            }
        }
    });
    ActorRef { tx, name }
}

async fn run_actor<A: Actor>(mut actor: A, mut rx: mpsc::Receiver<Envelope<A>>) {
    let name = actor.name();
    tracing::debug!(actor = name, "actor started");

    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Request { request, reply } => {
                let response = actor.handle(request).await;
                if reply.send(response).is_err() {
                    tracing::debug!(actor = name, "caller dropped before response");
                }
            }
            Envelope::Stop { done } => {
                rx.close();
                let mut waiters = vec![done];
                while let Some(pending) = rx.recv().await {
                    match pending {
                        Envelope::Request { request, reply } => {
                            let response = actor.handle(request).await;
                            let _ = reply.send(response);
                        }
                        Envelope::Stop { done } => waiters.push(done),
                    }
                }
                actor.on_stop().await;
                for done in waiters {
                    let _ = done.send(());
                }
                tracing::debug!(actor = name, "actor stopped");
                return;
            }
        }
    }

    // 所有引用都已丢弃
    actor.on_stop().await;
    tracing::debug!(actor = name, "actor stopped (all references dropped)");
}
