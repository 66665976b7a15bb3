//! 上下文压缩
//!
//! 当会话估算 token 超过上下文窗口的阈值比例时，把最早的一段消息折叠为一条系统摘要消息。
//! 前缀边界按纯算术规则选取：最小的 k 使 sum(tokens[0..k)) >= total * pct / 100。

use super::conversation::{Message, Role};
use super::session::Session;

/// 无法识别模型时的保守上下文窗口
pub const DEFAULT_CONTEXT_WINDOW: usize = 8_192;

pub const SUMMARY_HEADER: &str = "[Summary of earlier conversation, compacted to save context]";

const ELLIPSIS: &str = "...";

/// 模型名子串 -> 上下文窗口；按顺序匹配，具体条目在前
const CONTEXT_WINDOW_TABLE: &[(&str, usize)] = &[
    ("claude", 200_000),
    ("gpt-4o", 128_000),
    ("gpt-4.1", 1_047_576),
    ("gpt-4-turbo", 128_000),
    ("gpt-4-32k", 32_768),
    ("gpt-4", 8_192),
    ("gpt-3.5", 16_385),
    ("o1", 200_000),
    ("o3", 200_000),
    ("o4", 200_000),
    ("gemini", 1_048_576),
    ("deepseek", 65_536),
    ("qwen", 32_768),
    ("mistral", 32_768),
    ("llama", 8_192),
];

/// 选择需要压缩的前缀长度
///
/// 从左到右累加，在累计值达到阈值的那条消息处（含）停止。0 token 的消息计入 k 但不增加累计值。
/// 阈值为 0 时返回 0；没有任何前缀达到阈值时返回 `tokens.len()`。
pub fn select_compaction_prefix(tokens: &[usize], total_budget: usize, threshold_percent: u8) -> usize {
    // sum >= total * pct / 100 <=> sum * 100 >= total * pct，避免整数除法截断
    let target = total_budget as u128 * threshold_percent as u128;
    if target == 0 {
        return 0;
    }
    let mut sum: u128 = 0;
    for (i, &t) in tokens.iter().enumerate() {
        sum += t as u128;
        if sum * 100 >= target {
            return i + 1;
        }
    }
    tokens.len()
}

/// 折叠空白、去首尾空白，并截断到 `max_chars` 个字符（截断时以 "..." 结尾，计入长度）
pub fn condense_content(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    if max_chars <= ELLIPSIS.len() {
        return collapsed.chars().take(max_chars).collect();
    }
    let keep = max_chars - ELLIPSIS.len();
    let head: String = collapsed.chars().take(keep).collect();
    format!("{}{}", head.trim_end(), ELLIPSIS)
}

/// 把 `messages[0..k)` 折叠为一条系统摘要消息，每条被替换的消息一行
pub fn compact_prefix(messages: &[Message], prefix_len: usize, max_chars: usize) -> Message {
    let prefix_len = prefix_len.min(messages.len());
    let mut lines = Vec::with_capacity(prefix_len + 1);
    lines.push(SUMMARY_HEADER.to_string());
    for msg in &messages[..prefix_len] {
        let label = match (&msg.role, &msg.tool_name) {
            (Role::Tool, Some(name)) => format!("tool:{name}"),
            (role, _) => role.as_str().to_string(),
        };
        let mut body = msg.content.clone();
        if !msg.tool_calls.is_empty() {
            let names: Vec<&str> = msg.tool_calls.iter().map(|c| c.name.as_str()).collect();
            body = format!("{body} (called: {})", names.join(", "));
        }
        lines.push(format!("[{label}] {}", condense_content(&body, max_chars)));
    }
    // 摘要之后的消息才会变化，摘要本身作为可缓存前缀的结尾
    Message::system(lines.join("\n")).with_cache_breakpoint()
}

/// 调整前缀边界：
/// - 边界处的 tool 消息并入前缀，避免工具结果与其调用分离；
/// - 至少保留末尾 `keep_recent` 条消息，回退时同样不能切开调用与结果。
pub fn adjust_prefix_boundary(messages: &[Message], prefix_len: usize, keep_recent: usize) -> usize {
    let len = messages.len();
    let mut k = prefix_len.min(len);
    while k < len && messages[k].role == Role::Tool {
        k += 1;
    }
    let max_k = len.saturating_sub(keep_recent);
    if k > max_k {
        k = max_k;
        while k > 0 && k < len && messages[k].role == Role::Tool {
            k -= 1;
        }
    }
    k
}

/// 解析模型上下文窗口：Provider 元数据优先，其次按模型名子串查表，未知时使用保守默认值
pub fn resolve_context_window(model: &str, provider_window: Option<usize>) -> usize {
    if let Some(window) = provider_window.filter(|w| *w > 0) {
        return window;
    }
    let lower = model.to_lowercase();
    CONTEXT_WINDOW_TABLE
        .iter()
        .find(|(key, _)| lower.contains(key))
        .map(|(_, window)| *window)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

/// 当前上下文占用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextUsage {
    pub used_tokens: usize,
    pub context_window: usize,
    pub threshold_percent: u8,
}

impl ContextUsage {
    pub fn new(used_tokens: usize, context_window: usize, threshold_percent: u8) -> Self {
        Self {
            used_tokens,
            context_window,
            threshold_percent,
        }
    }

    /// 以指定百分比判断是否越过阈值
    pub fn exceeds_percent(&self, percent: u8) -> bool {
        let target = self.context_window as u128 * percent as u128;
        target > 0 && self.used_tokens as u128 * 100 >= target
    }

    pub fn exceeds_threshold(&self) -> bool {
        self.exceeds_percent(self.threshold_percent)
    }

    pub fn percent_used(&self) -> f64 {
        if self.context_window == 0 {
            return 0.0;
        }
        self.used_tokens as f64 * 100.0 / self.context_window as f64
    }
}

/// 一次压缩的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    pub messages_replaced: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

/// 会话压缩器
#[derive(Debug, Clone)]
pub struct ContextCompactor {
    threshold_percent: u8,
    keep_recent: usize,
    max_chars: usize,
}

impl ContextCompactor {
    pub fn new(threshold_percent: u8, keep_recent: usize, max_chars: usize) -> Self {
        Self {
            threshold_percent,
            keep_recent,
            max_chars,
        }
    }

    /// 压缩会话前缀；没有可压缩的消息时 `messages_replaced` 为 0
    pub fn compact(&self, session: &mut Session, context_window: usize) -> CompactionReport {
        let counts = session.message_token_counts();
        let tokens_before: usize = counts.iter().sum();
        let k = select_compaction_prefix(&counts, context_window, self.threshold_percent);
        let k = adjust_prefix_boundary(session.messages(), k, self.keep_recent);
        if k == 0 {
            return CompactionReport {
                messages_replaced: 0,
                tokens_before,
                tokens_after: tokens_before,
            };
        }
        let summary = compact_prefix(session.messages(), k, self.max_chars);
        session.replace_prefix(k, summary);
        let tokens_after = session.estimated_tokens();
        tracing::info!(
            replaced = k,
            tokens_before,
            tokens_after,
            "context compacted"
        );
        CompactionReport {
            messages_replaced: k,
            tokens_before,
            tokens_after,
        }
    }
}
