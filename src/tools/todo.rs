//! todo_read / todo_write 工具：模型维护自己的任务列表，数据由 Todo Actor 持有

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::actor::{render_todos, TodoDraft, TodoListHandle};
use crate::tools::{factory, ToolAccess, ToolContext, ToolHandler, ToolOutput, ToolRegistry, ToolSpec};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TodoWriteArgs {
    /// 完整的新任务列表（整体替换）
    pub todos: Vec<TodoDraft>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TodoReadArgs {}

#[derive(Clone)]
pub struct TodoReadTool {
    todos: TodoListHandle,
}

#[derive(Clone)]
pub struct TodoWriteTool {
    todos: TodoListHandle,
}

impl TodoReadTool {
    pub const NAME: &'static str = "todo_read";

    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            Self::NAME,
            "Show the current task list with item ids and statuses.",
            ToolAccess::ReadOnly,
        )
        .with_schema::<TodoReadArgs>()
    }
}

impl TodoWriteTool {
    pub const NAME: &'static str = "todo_write";

    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            Self::NAME,
            "Replace the task list. Pass every item with its status (pending, in_progress, completed).",
            ToolAccess::Internal,
        )
        .with_schema::<TodoWriteArgs>()
    }
}

/// 注册 todo_read 与 todo_write
pub fn register_todo_tools(registry: &mut ToolRegistry, todos: &TodoListHandle) {
    registry.register(
        TodoReadTool::spec(),
        factory(TodoReadTool {
            todos: todos.clone(),
        }),
    );
    registry.register(
        TodoWriteTool::spec(),
        factory(TodoWriteTool {
            todos: todos.clone(),
        }),
    );
}

#[async_trait]
impl ToolHandler for TodoReadTool {
    async fn execute(&self, _ctx: &ToolContext, _parameters: Value) -> Result<ToolOutput, String> {
        let items = self.todos.list().await.map_err(|e| e.to_string())?;
        if items.is_empty() {
            return Ok(ToolOutput::text("The task list is empty."));
        }
        Ok(ToolOutput::text(render_todos(&items)))
    }
}

#[async_trait]
impl ToolHandler for TodoWriteTool {
    async fn execute(&self, _ctx: &ToolContext, parameters: Value) -> Result<ToolOutput, String> {
        let args: TodoWriteArgs =
            serde_json::from_value(parameters).map_err(|e| format!("invalid arguments: {e}"))?;
        let items = self
            .todos
            .replace(args.todos)
            .await
            .map_err(|e| e.to_string())?;
        Ok(ToolOutput::text(format!(
            "Task list updated ({} items):\n{}",
            items.len(),
            render_todos(&items)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::TodoListActor;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_write_then_read() {
        let todos = TodoListHandle::spawn(TodoListActor::new());
        let ctx = ToolContext::new("c1", ".", CancellationToken::new());
        let write = TodoWriteTool {
            todos: todos.clone(),
        };
        let out = write
            .execute(
                &ctx,
                json!({"todos": [
                    {"content": "add parser", "status": "in_progress"},
                    {"content": "add tests"}
                ]}),
            )
            .await
            .unwrap();
        assert!(out.content.starts_with("Task list updated (2 items)"));

        let read = TodoReadTool { todos };
        let out = read.execute(&ctx, json!({})).await.unwrap();
        assert!(out.content.contains("[~] #1 add parser"));
        assert!(out.content.contains("[ ] #2 add tests"));
    }

    #[tokio::test]
    async fn test_write_rejects_bad_status() {
        let todos = TodoListHandle::spawn(TodoListActor::new());
        let ctx = ToolContext::new("c1", ".", CancellationToken::new());
        let write = TodoWriteTool { todos };
        let err = write
            .execute(&ctx, json!({"todos": [{"content": "x", "status": "someday"}]}))
            .await
            .unwrap_err();
        assert!(err.starts_with("invalid arguments"));
    }
}
