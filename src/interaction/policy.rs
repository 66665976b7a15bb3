//! 非交互策略
//!
//! 无人值守时按静态白名单同步作答：目录、文件 glob、命令（首词 + 禁止子串）、域名（含子域名），
//! 或 allow_all。未命中任何规则一律拒绝。问题回答默认值，问卷回答每题第一个选项。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{
    InteractionError, InteractionHandler, InteractionRequest, InteractionResponse, QuestionAnswer,
};

/// 即使命令首词在白名单中也不允许出现的子串
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "rm -r",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:",
];

/// 命令串联符：每一段的首词都要在白名单中
const COMMAND_SEPARATORS: &[&str] = &["&&", "||", ";", "|", "\n"];

const PATH_KEYS: &[&str] = &["path", "file_path", "directory", "dir"];
const COMMAND_KEYS: &[&str] = &["command", "cmd"];
const URL_KEYS: &[&str] = &["url", "uri"];

/// 白名单配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionPolicy {
    #[serde(default)]
    pub allow_all: bool,
    #[serde(default)]
    pub allowed_directories: Vec<PathBuf>,
    #[serde(default)]
    pub allowed_files: Vec<String>,
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allowed(String),
    Denied(String),
}

impl PolicyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allowed(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            PolicyDecision::Allowed(r) | PolicyDecision::Denied(r) => r,
        }
    }
}

pub struct PolicyInteractionHandler {
    allow_all: bool,
    working_dir: PathBuf,
    directories: Vec<PathBuf>,
    file_patterns: Vec<glob::Pattern>,
    commands: Vec<String>,
    domains: Vec<String>,
}

impl PolicyInteractionHandler {
    pub fn new(policy: &InteractionPolicy, working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        let directories = policy
            .allowed_directories
            .iter()
            .map(|d| normalize_path(&working_dir, d))
            .collect();
        let file_patterns = policy
            .allowed_files
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "invalid file pattern ignored");
                    None
                }
            })
            .collect();
        Self {
            allow_all: policy.allow_all,
            directories,
            file_patterns,
            commands: policy
                .allowed_commands
                .iter()
                .map(|c| c.trim().to_lowercase())
                .collect(),
            domains: policy
                .allowed_domains
                .iter()
                .map(|d| d.trim().trim_start_matches("*.").to_lowercase())
                .collect(),
            working_dir,
        }
    }

    /// 对一次工具调用做出决定：所有可识别的目标（路径 / 命令 / URL）都必须命中白名单
    pub fn evaluate(&self, tool_name: &str, parameters: &Value) -> PolicyDecision {
        if self.allow_all {
            return PolicyDecision::Allowed("allow_all policy".to_string());
        }
        let mut checked = 0usize;
        for (keys, check) in [
            (PATH_KEYS, Self::check_path as fn(&Self, &str) -> Result<(), String>),
            (COMMAND_KEYS, Self::check_command),
            (URL_KEYS, Self::check_url),
        ] {
            for key in keys {
                if let Some(value) = parameters.get(*key).and_then(|v| v.as_str()) {
                    checked += 1;
                    if let Err(reason) = check(self, value) {
                        return PolicyDecision::Denied(reason);
                    }
                }
            }
        }
        if checked == 0 {
            return PolicyDecision::Denied(format!("no policy rule covers `{tool_name}`"));
        }
        PolicyDecision::Allowed(format!("`{tool_name}` matches the allow-list"))
    }

    fn check_path(&self, raw: &str) -> Result<(), String> {
        let path = normalize_path(&self.working_dir, Path::new(raw));
        if self.directories.iter().any(|dir| path.starts_with(dir)) {
            return Ok(());
        }
        let relative = path.strip_prefix(&self.working_dir).unwrap_or(&path);
        let matched = self
            .file_patterns
            .iter()
            .any(|p| p.matches_path(&path) || p.matches_path(relative));
        if matched {
            Ok(())
        } else {
            Err(format!("path `{raw}` is outside the allowed directories and files"))
        }
    }

    fn check_command(&self, raw: &str) -> Result<(), String> {
        let lower = raw.to_lowercase();
        if let Some(forbidden) = FORBIDDEN_SUBSTR.iter().find(|f| lower.contains(*f)) {
            return Err(format!("command contains forbidden pattern `{forbidden}`"));
        }
        let mut segments = vec![lower.as_str()];
        for sep in COMMAND_SEPARATORS {
            segments = segments.iter().flat_map(|s| s.split(sep)).collect();
        }
        let mut any = false;
        for segment in segments {
            let Some(first) = segment.split_whitespace().next() else {
                continue;
            };
            any = true;
            if !self.commands.iter().any(|c| c == first) {
                return Err(format!("command `{first}` is not in the allowed commands"));
            }
        }
        if any {
            Ok(())
        } else {
            Err("empty command".to_string())
        }
    }

    fn check_url(&self, raw: &str) -> Result<(), String> {
        let url = url::Url::parse(raw).map_err(|e| format!("invalid url `{raw}`: {e}"))?;
        let host = url
            .host_str()
            .ok_or_else(|| format!("url `{raw}` has no host"))?
            .to_lowercase();
        let allowed = self
            .domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")));
        if allowed {
            Ok(())
        } else {
            Err(format!("domain `{host}` is not in the allowed domains"))
        }
    }
}

#[async_trait]
impl InteractionHandler for PolicyInteractionHandler {
    async fn handle_interaction(
        &self,
        request: InteractionRequest,
        _cancel: &CancellationToken,
    ) -> Result<InteractionResponse, InteractionError> {
        match request {
            InteractionRequest::Approval {
                tool_name,
                parameters,
                ..
            } => {
                let decision = self.evaluate(&tool_name, &parameters);
                if decision.is_allowed() {
                    tracing::info!(tool = %tool_name, reason = decision.reason(), "policy approved tool call");
                } else {
                    tracing::warn!(tool = %tool_name, reason = decision.reason(), "policy denied tool call");
                }
                Ok(InteractionResponse::Approval(decision.is_allowed()))
            }
            InteractionRequest::Question { default, .. } => {
                Ok(InteractionResponse::Answer(default.unwrap_or_default()))
            }
            InteractionRequest::Questionnaire { questions, .. } => Ok(InteractionResponse::Answers(
                questions
                    .into_iter()
                    .map(|q| QuestionAnswer {
                        answer: q.options.into_iter().next().unwrap_or_default(),
                        id: q.id,
                    })
                    .collect(),
            )),
        }
    }
}

/// 词法规范化：相对路径基于工作目录，消去 `.` 与 `..`（不访问文件系统）
fn normalize_path(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
