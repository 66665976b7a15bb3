//! 工具层：注册表、授权闸门、调度执行器与内置工具

pub mod authorization;
pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod todo;

pub use authorization::{
    AllowAll, AuthorizationRequest, Authorizer, FnAuthorizer, InteractionAuthorizer,
};
pub use echo::EchoTool;
pub use executor::{ActiveCall, ToolDispatcher};
pub use registry::{
    factory, ToolAccess, ToolContext, ToolFactory, ToolHandler, ToolMetadata, ToolOutcome,
    ToolOutput, ToolRegistry, ToolResult, ToolSchema, ToolSpec,
};
pub use schema::parameters_schema;
pub use todo::{register_todo_tools, TodoReadTool, TodoWriteTool};
