//! Echo 工具（诊断用）

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::{factory, ToolAccess, ToolContext, ToolHandler, ToolOutput, ToolRegistry, ToolSpec};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EchoArgs {
    /// 要回显的文本
    pub text: String,
}

/// Echo 工具：回显文本
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoTool;

impl EchoTool {
    pub const NAME: &'static str = "echo";

    pub fn spec() -> ToolSpec {
        ToolSpec::new(
            Self::NAME,
            "Echo text back unchanged (diagnostic).",
            ToolAccess::ReadOnly,
        )
        .with_schema::<EchoArgs>()
    }

    pub fn register(registry: &mut ToolRegistry) {
        registry.register(Self::spec(), factory(EchoTool));
    }
}

#[async_trait]
impl ToolHandler for EchoTool {
    async fn execute(&self, _ctx: &ToolContext, parameters: Value) -> Result<ToolOutput, String> {
        let args: EchoArgs =
            serde_json::from_value(parameters).map_err(|e| format!("invalid arguments: {e}"))?;
        Ok(ToolOutput::text(args.text))
    }
}
