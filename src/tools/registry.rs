//! 工具注册表
//!
//! 每个工具以 ToolSpec（名称 / 描述 / 参数 schema / 访问级别）+ 工厂注册；工厂在每次调用时构造 ToolHandler。
//! 注册表负责按名查找、生成模型侧 schema 与执行；未知工具返回错误结果而非失败。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::memory::{Message, ToolCall};
use crate::tools::schema::parameters_schema;

/// 工具访问级别：决定是否必须经过授权闸门
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAccess {
    /// 只读（读文件、搜索等）
    ReadOnly,
    /// 只改动运行时内部状态（如 todo 列表）
    Internal,
    FileWrite,
    Shell,
    Network,
}

impl ToolAccess {
    pub fn requires_approval(self) -> bool {
        matches!(self, ToolAccess::FileWrite | ToolAccess::Shell | ToolAccess::Network)
    }

    pub fn describe(self) -> &'static str {
        match self {
            ToolAccess::ReadOnly => "read-only access",
            ToolAccess::Internal => "runtime state",
            ToolAccess::FileWrite => "modifies files",
            ToolAccess::Shell => "runs shell commands",
            ToolAccess::Network => "accesses the network",
        }
    }
}

/// 工具规格
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// 参数 JSON Schema
    pub parameters: Value,
    pub access: ToolAccess,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, access: ToolAccess) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
            }),
            access,
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// 从参数结构体派生 schema
    pub fn with_schema<T: JsonSchema>(self) -> Self {
        self.with_parameters(parameters_schema::<T>())
    }
}

/// 模型侧函数 schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// 单次调用的执行上下文
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub call_id: String,
    pub working_dir: PathBuf,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(call_id: impl Into<String>, working_dir: impl Into<PathBuf>, cancel: CancellationToken) -> Self {
        Self {
            call_id: call_id.into(),
            working_dir: working_dir.into(),
            cancel,
        }
    }
}

/// 工具输出
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub bytes: Option<u64>,
    pub lines: Option<u64>,
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            bytes: Some(content.len() as u64),
            lines: Some(content.lines().count() as u64),
            content,
            exit_code: None,
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

/// 工具执行器 trait：业务逻辑在本 crate 之外实现
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, ctx: &ToolContext, parameters: Value) -> Result<ToolOutput, String>;
}

/// 每次调用构造一个执行器
pub type ToolFactory = Arc<dyn Fn() -> Box<dyn ToolHandler> + Send + Sync>;

/// 把可克隆的执行器包装成工厂
pub fn factory<H>(handler: H) -> ToolFactory
where
    H: ToolHandler + Clone + 'static,
{
    Arc::new(move || Box::new(handler.clone()))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ToolMetadata {
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// 结果值或错误字符串，二者只居其一
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Success(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ToolMetadata>,
}

impl ToolResult {
    pub fn success(call: &ToolCall, content: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Success(content.into()),
            metadata: None,
        }
    }

    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Error(message.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ToolMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        let metadata = self.metadata.get_or_insert_with(ToolMetadata::default);
        metadata.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error(_))
    }

    pub fn content(&self) -> &str {
        match &self.outcome {
            ToolOutcome::Success(s) | ToolOutcome::Error(s) => s,
        }
    }

    /// 转为 tool 消息；错误以 "Error: " 前缀呈现给模型
    pub fn to_message(&self) -> Message {
        let content = match &self.outcome {
            ToolOutcome::Success(s) => s.clone(),
            ToolOutcome::Error(e) => format!("Error: {e}"),
        };
        Message::tool_result(&self.call_id, &self.tool_name, content)
    }
}

struct RegisteredTool {
    spec: ToolSpec,
    factory: ToolFactory,
}

/// 工具注册表：按名称存储 ToolSpec + 工厂
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工具；同名工具会被替换
    pub fn register(&mut self, spec: ToolSpec, factory: ToolFactory) {
        let name = spec.name.clone();
        if self
            .tools
            .insert(name.clone(), RegisteredTool { spec, factory })
            .is_some()
        {
            tracing::warn!(tool = %name, "tool re-registered, previous definition replaced");
        }
    }

    pub fn spec(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|t| &t.spec)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 模型侧 schema，按名称排序
    pub fn to_json_schema(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.spec.name.clone(),
                description: t.spec.description.clone(),
                parameters: t.spec.parameters.clone(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn to_schema_json(&self) -> String {
        serde_json::to_string_pretty(&self.to_json_schema()).unwrap_or_else(|_| "[]".to_string())
    }

    /// 执行工具调用（不经授权闸门）；未知工具与执行失败都返回错误结果
    pub async fn execute(&self, ctx: &ToolContext, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult::error(call, format!("unknown tool: {}", call.name));
        };
        let handler = (tool.factory)();
        let start = Instant::now();
        let result = tokio::select! {
            r = handler.execute(ctx, call.parameters.clone()) => r,
            _ = ctx.cancel.cancelled() => Err("cancelled".to_string()),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(output) => ToolResult::success(call, output.content).with_metadata(ToolMetadata {
                duration_ms,
                bytes: output.bytes,
                lines: output.lines,
                exit_code: output.exit_code,
            }),
            Err(e) => ToolResult::error(call, e).with_metadata(ToolMetadata {
                duration_ms,
                ..Default::default()
            }),
        }
    }
}
