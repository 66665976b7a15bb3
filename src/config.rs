//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读默认 TOML，再读显式指定的文件，最后用环境变量 `HIVE__*` 覆盖
//! （双下划线表示嵌套，如 `HIVE__AGENT__MAX_ITERATIONS=20`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::interaction::InteractionPolicy;
use crate::llm::SamplingParams;
use crate::react::LoopConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
    pub interaction: InteractionSection,
}

/// [app] 段：名称、工作目录、会话存储目录
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// 工具的工作目录，未设置时用当前目录
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// 会话 JSON 存储目录；未设置时只保存在内存中
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
    /// 系统提示词文件
    #[serde(default)]
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            working_dir: None,
            session_dir: None,
            system_prompt_path: None,
        }
    }
}

fn default_app_name() -> String {
    "hive".to_string()
}

/// [llm] 段
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    /// 覆盖上下文窗口；未设置时按 Provider 报告或模型名查表
    #[serde(default)]
    pub context_window: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// 是否使用流式补全
    #[serde(default)]
    pub stream: bool,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            context_window: None,
            temperature: None,
            max_tokens: None,
            stream: false,
        }
    }
}

impl LlmSection {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: None,
        }
    }
}

fn default_model() -> String {
    "claude-sonnet-4".to_string()
}

/// [agent] 段：编排循环参数
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_max_auto_continue_attempts")]
    pub max_auto_continue_attempts: usize,
    #[serde(default = "default_true")]
    pub enable_loop_detection: bool,
    #[serde(default = "default_true")]
    pub enable_auto_continue: bool,
    #[serde(default = "default_compaction_threshold_percent")]
    pub context_compaction_threshold_percent: u8,
    #[serde(default = "default_max_consecutive_compactions")]
    pub max_consecutive_compactions: usize,
    #[serde(default = "default_loop_detection_window")]
    pub loop_detection_window: usize,
    #[serde(default = "default_loop_detection_threshold")]
    pub loop_detection_threshold: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// 压缩时保留的最近消息条数
    #[serde(default = "default_compaction_keep_recent")]
    pub compaction_keep_recent: usize,
    #[serde(default = "default_condensed_message_chars")]
    pub condensed_message_chars: usize,
    /// default / conservative / aggressive / planning
    #[serde(default = "default_strategy")]
    pub strategy: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_auto_continue_attempts: default_max_auto_continue_attempts(),
            enable_loop_detection: true,
            enable_auto_continue: true,
            context_compaction_threshold_percent: default_compaction_threshold_percent(),
            max_consecutive_compactions: default_max_consecutive_compactions(),
            loop_detection_window: default_loop_detection_window(),
            loop_detection_threshold: default_loop_detection_threshold(),
            max_retries: default_max_retries(),
            compaction_keep_recent: default_compaction_keep_recent(),
            condensed_message_chars: default_condensed_message_chars(),
            strategy: default_strategy(),
        }
    }
}

impl AgentSection {
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_iterations: self.max_iterations,
            max_auto_continue_attempts: self.max_auto_continue_attempts,
            enable_loop_detection: self.enable_loop_detection,
            enable_auto_continue: self.enable_auto_continue,
            context_compaction_threshold_percent: self.context_compaction_threshold_percent.min(100),
            max_consecutive_compactions: self.max_consecutive_compactions,
            loop_detection_window: self.loop_detection_window,
            loop_detection_threshold: self.loop_detection_threshold,
            max_retries: self.max_retries,
            compaction_keep_recent: self.compaction_keep_recent,
            condensed_message_chars: self.condensed_message_chars,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_iterations() -> usize {
    50
}

fn default_max_auto_continue_attempts() -> usize {
    3
}

fn default_compaction_threshold_percent() -> u8 {
    80
}

fn default_max_consecutive_compactions() -> usize {
    3
}

fn default_loop_detection_window() -> usize {
    10
}

fn default_loop_detection_threshold() -> usize {
    3
}

fn default_max_retries() -> usize {
    2
}

fn default_compaction_keep_recent() -> usize {
    2
}

fn default_condensed_message_chars() -> usize {
    200
}

fn default_strategy() -> String {
    "default".to_string()
}

/// [tools] 段：超时与并发
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用默认超时（秒）
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// 调用方通过 `timeout_secs` 参数可申请的上限
    #[serde(default = "default_max_tool_timeout")]
    pub max_tool_timeout_secs: u64,
    #[serde(default = "default_max_parallel_tools")]
    pub max_parallel_tools: usize,
    /// 同一轮的多个工具调用是否并行执行
    #[serde(default)]
    pub parallel_tool_calls: bool,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout(),
            max_tool_timeout_secs: default_max_tool_timeout(),
            max_parallel_tools: default_max_parallel_tools(),
            parallel_tool_calls: false,
        }
    }
}

fn default_tool_timeout() -> u64 {
    30
}

fn default_max_tool_timeout() -> u64 {
    600
}

fn default_max_parallel_tools() -> usize {
    3
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// 按 [interaction.policy] 白名单自动作答
    #[default]
    NonInteractive,
    /// 通过交互桥询问前端
    Interactive,
}

/// [interaction] 段
#[derive(Debug, Clone, Deserialize)]
pub struct InteractionSection {
    #[serde(default)]
    pub mode: InteractionMode,
    #[serde(default = "default_interaction_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub policy: InteractionPolicy,
}

impl Default for InteractionSection {
    fn default() -> Self {
        Self {
            mode: InteractionMode::default(),
            timeout_secs: default_interaction_timeout(),
            policy: InteractionPolicy::default(),
        }
    }
}

fn default_interaction_timeout() -> u64 {
    120
}

/// 加载配置：config/default.toml（若存在）-> 指定文件 -> HIVE__* 环境变量
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("interaction.policy.allowed_commands")
            .with_list_parse_key("interaction.policy.allowed_domains")
            .with_list_parse_key("interaction.policy.allowed_directories")
            .with_list_parse_key("interaction.policy.allowed_files")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 程序入口使用：显式给出的配置文件加载失败时返回错误；
/// 未指定文件时，默认配置或环境变量有误只记录警告并使用内置默认值
pub fn load_app_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    match config_path {
        Some(path) => load_config(Some(path)),
        None => Ok(load_config(None).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "config load failed, using defaults");
            AppConfig::default()
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.model, "claude-sonnet-4");
        assert_eq!(cfg.agent.max_iterations, 50);
        assert_eq!(cfg.tools.max_tool_timeout_secs, 600);
        assert_eq!(cfg.interaction.mode, InteractionMode::NonInteractive);
        assert!(!cfg.interaction.policy.allow_all);
        assert_eq!(cfg.agent.loop_config(), LoopConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[llm]
model = "gpt-4o"

[agent]
max_iterations = 7
strategy = "planning"
compaction_keep_recent = 4
condensed_message_chars = 80

[interaction]
mode = "interactive"

[interaction.policy]
allowed_commands = ["cargo", "git"]
"#
        )
        .unwrap();
        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.model, "gpt-4o");
        assert_eq!(cfg.agent.max_iterations, 7);
        let loop_config = cfg.agent.loop_config();
        assert_eq!(loop_config.max_iterations, 7);
        assert_eq!(loop_config.compaction_keep_recent, 4);
        assert_eq!(loop_config.condensed_message_chars, 80);
        assert_eq!(cfg.agent.strategy, "planning");
        assert_eq!(cfg.interaction.mode, InteractionMode::Interactive);
        assert_eq!(cfg.interaction.policy.allowed_commands, vec!["cargo", "git"]);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
    }

    #[test]
    fn test_explicit_config_path_must_load() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(load_app_config(Some(missing)).is_err());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[agent]\nmax_iterations = \"many\"\n").unwrap();
        assert!(load_app_config(Some(broken)).is_err());
    }
}
