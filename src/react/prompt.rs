//! 系统提示词来源

use async_trait::async_trait;

use crate::actor::{render_todos, TodoListHandle};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Hive, a careful assistant that completes tasks by calling tools. \
Use the provided tools when they help, keep the task list up to date with todo_write for multi-step work, \
and reply with a concise final answer once the task is done.";

/// 每轮构建请求时调用一次
#[async_trait]
pub trait SystemPromptProvider: Send + Sync {
    async fn system_prompt(&self) -> String;
}

/// 固定提示词；挂上 Todo Actor 后附加当前任务列表
pub struct StaticPrompt {
    base: String,
    todos: Option<TodoListHandle>,
}

impl StaticPrompt {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            todos: None,
        }
    }

    pub fn with_todos(mut self, todos: TodoListHandle) -> Self {
        self.todos = Some(todos);
        self
    }
}

impl Default for StaticPrompt {
    fn default() -> Self {
        Self::new(DEFAULT_SYSTEM_PROMPT)
    }
}

#[async_trait]
impl SystemPromptProvider for StaticPrompt {
    async fn system_prompt(&self) -> String {
        let Some(todos) = &self.todos else {
            return self.base.clone();
        };
        match todos.list().await {
            Ok(items) if !items.is_empty() => {
                format!("{}\n\n## Current task list\n{}", self.base, render_todos(&items))
            }
            Ok(_) => self.base.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "todo list unavailable for system prompt");
                self.base.clone()
            }
        }
    }
}
