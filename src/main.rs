//! Hive - 编码智能体编排运行时
//!
//! 入口：初始化日志、加载配置，用 Mock 模型与非交互策略构建 Agent，
//! 从标准输入读取一个任务，打印进度流与最终结果。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use hive::config::load_app_config;
use hive::llm::MockLlmClient;
use hive::react::ProgressKind;
use hive::{create_agent, AgentBuilder};
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_app_config(config_path.clone()).with_context(|| match &config_path {
        Some(path) => format!("loading config {}", path.display()),
        None => "loading config".to_string(),
    })?;

    let llm = Arc::new(MockLlmClient::new(config.llm.model.clone()));
    let components = AgentBuilder::new(config, llm)
        .build()
        .context("Failed to build agent")?;
    let mut agent = create_agent(components);

    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("Failed to read task from stdin")?;
    let task = input.trim();
    if task.is_empty() {
        anyhow::bail!("no task given on stdin");
    }
    agent.submit(task).context("Failed to submit task")?;

    let result = loop {
        tokio::select! {
            Some(update) = agent.progress.recv() => {
                if update.stream_to_user {
                    print!("{}", update.message);
                } else if update.show_as_status || update.kind == ProgressKind::ToolResult {
                    eprintln!("[{:?}] {}", update.kind, update.message);
                }
            }
            result = agent.results.recv() => break result,
        }
    };
    while let Ok(update) = agent.progress.try_recv() {
        if update.show_as_status {
            eprintln!("[{:?}] {}", update.kind, update.message);
        }
    }

    let result = result.context("Agent stopped before finishing the task")?;
    println!("{}", result.response.as_deref().unwrap_or(""));
    eprintln!(
        "status: {} ({} iterations)",
        result.reason, result.iterations_executed
    );
    agent.shutdown().await;
    Ok(())
}
