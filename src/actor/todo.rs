//! Todo 列表 Actor
//!
//! 结构化任务列表（id / 内容 / 状态）。每次变更后以完整列表调用变更回调；读取不触发回调。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{spawn, Actor, ActorRef};
use crate::core::AgentError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    fn marker(&self) -> &'static str {
        match self {
            TodoStatus::Pending => "[ ]",
            TodoStatus::InProgress => "[~]",
            TodoStatus::Completed => "[x]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: u32,
    pub content: String,
    pub status: TodoStatus,
}

/// 整体替换时的条目草稿（id 由 Actor 分配）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TodoDraft {
    /// 任务内容
    pub content: String,
    /// 任务状态，默认 pending
    #[serde(default)]
    pub status: TodoStatus,
}

pub type TodoChangeCallback = Arc<dyn Fn(&[TodoItem]) + Send + Sync>;

pub enum TodoRequest {
    Add(String),
    SetStatus { id: u32, status: TodoStatus },
    Remove(u32),
    Replace(Vec<TodoDraft>),
    List,
    Clear,
}

pub enum TodoResponse {
    Added(TodoItem),
    Updated(bool),
    Items(Vec<TodoItem>),
    Rejected(String),
}

pub struct TodoListActor {
    items: Vec<TodoItem>,
    next_id: u32,
    on_change: Option<TodoChangeCallback>,
}

impl Default for TodoListActor {
    fn default() -> Self {
        Self::new()
    }
}

impl TodoListActor {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            next_id: 1,
            on_change: None,
        }
    }

    pub fn with_on_change(mut self, callback: TodoChangeCallback) -> Self {
        self.on_change = Some(callback);
        self
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn notify(&self) {
        if let Some(cb) = &self.on_change {
            cb(&self.items);
        }
    }
}

#[async_trait]
impl Actor for TodoListActor {
    type Request = TodoRequest;
    type Response = TodoResponse;

    fn name(&self) -> &'static str {
        "todo_list"
    }

    async fn handle(&mut self, request: TodoRequest) -> TodoResponse {
        match request {
            TodoRequest::List => TodoResponse::Items(self.items.clone()),
            TodoRequest::Add(content) => {
                let content = content.trim().to_string();
                if content.is_empty() {
                    return TodoResponse::Rejected("todo content must not be empty".to_string());
                }
                let item = TodoItem {
                    id: self.allocate_id(),
                    content,
                    status: TodoStatus::Pending,
                };
                self.items.push(item.clone());
                self.notify();
                TodoResponse::Added(item)
            }
            TodoRequest::SetStatus { id, status } => {
                let Some(item) = self.items.iter_mut().find(|i| i.id == id) else {
                    return TodoResponse::Updated(false);
                };
                item.status = status;
                self.notify();
                TodoResponse::Updated(true)
            }
            TodoRequest::Remove(id) => {
                let before = self.items.len();
                self.items.retain(|i| i.id != id);
                let removed = self.items.len() != before;
                if removed {
                    self.notify();
                }
                TodoResponse::Updated(removed)
            }
            TodoRequest::Replace(drafts) => {
                if drafts.iter().any(|d| d.content.trim().is_empty()) {
                    return TodoResponse::Rejected("todo content must not be empty".to_string());
                }
                let mut items = Vec::with_capacity(drafts.len());
                for draft in drafts {
                    items.push(TodoItem {
                        id: self.allocate_id(),
                        content: draft.content.trim().to_string(),
                        status: draft.status,
                    });
                }
                self.items = items;
                self.notify();
                TodoResponse::Items(self.items.clone())
            }
            TodoRequest::Clear => {
                self.items.clear();
                self.notify();
                TodoResponse::Updated(true)
            }
        }
    }
}

/// 渲染为 Markdown 列表，供系统提示词与工具输出使用
pub fn render_todos(items: &[TodoItem]) -> String {
    items
        .iter()
        .map(|i| format!("- {} #{} {}", i.status.marker(), i.id, i.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Todo 列表的类型化引用
#[derive(Clone)]
pub struct TodoListHandle {
    actor: ActorRef<TodoListActor>,
}

impl fmt::Debug for TodoListHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TodoListHandle").finish_non_exhaustive()
    }
}

impl TodoListHandle {
    pub fn spawn(actor: TodoListActor) -> Self {
        Self {
            actor: spawn(actor),
        }
    }

    pub async fn add(&self, content: impl Into<String>) -> Result<TodoItem, AgentError> {
        match self.actor.send(TodoRequest::Add(content.into())).await? {
            TodoResponse::Added(item) => Ok(item),
            other => Err(rejected(other)),
        }
    }

    pub async fn set_status(&self, id: u32, status: TodoStatus) -> Result<bool, AgentError> {
        match self.actor.send(TodoRequest::SetStatus { id, status }).await? {
            TodoResponse::Updated(found) => Ok(found),
            other => Err(rejected(other)),
        }
    }

    pub async fn remove(&self, id: u32) -> Result<bool, AgentError> {
        match self.actor.send(TodoRequest::Remove(id)).await? {
            TodoResponse::Updated(found) => Ok(found),
            other => Err(rejected(other)),
        }
    }

    pub async fn replace(&self, drafts: Vec<TodoDraft>) -> Result<Vec<TodoItem>, AgentError> {
        match self.actor.send(TodoRequest::Replace(drafts)).await? {
            TodoResponse::Items(items) => Ok(items),
            other => Err(rejected(other)),
        }
    }

    pub async fn list(&self) -> Result<Vec<TodoItem>, AgentError> {
        match self.actor.send(TodoRequest::List).await? {
            TodoResponse::Items(items) => Ok(items),
            other => Err(rejected(other)),
        }
    }

    pub async fn clear(&self) -> Result<(), AgentError> {
        self.actor.send(TodoRequest::Clear).await?;
        Ok(())
    }

    /// 未完成条目数（pending + in_progress）
    pub async fn unfinished_count(&self) -> Result<usize, AgentError> {
        Ok(self
            .list()
            .await?
            .iter()
            .filter(|i| i.status != TodoStatus::Completed)
            .count())
    }
}

fn rejected(response: TodoResponse) -> AgentError {
    match response {
        TodoResponse::Rejected(reason) => AgentError::ToolExecutionFailed(reason),
        _ => AgentError::ToolExecutionFailed("unexpected todo list response".to_string()),
    }
}
