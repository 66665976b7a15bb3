//! Token 估算
//!
//! 没有 tokenizer 时使用字符计数近似：英文约 4 字符/token，中文约 1.5 字符/token。

use super::conversation::Message;

/// 每条消息的固定开销（角色标记、分隔符）
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量；空文本为 0
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0usize;
        let mut non_ascii_chars = 0usize;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        ascii_chars.div_ceil(4) + (non_ascii_chars as f64 / 1.5).ceil() as usize
    }

    /// 估算单条消息：正文 + 工具调用参数 + 固定开销
    pub fn estimate_message(message: &Message) -> usize {
        let calls: usize = message
            .tool_calls
            .iter()
            .map(|c| Self::estimate(&c.name) + Self::estimate(&c.parameters.to_string()))
            .sum();
        Self::estimate(&message.content) + calls + MESSAGE_OVERHEAD_TOKENS
    }

    pub fn estimate_messages(messages: &[Message]) -> usize {
        messages.iter().map(Self::estimate_message).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::conversation::ToolCall;
    use serde_json::json;

    #[test]
    fn test_token_estimation() {
        assert_eq!(TokenEstimator::estimate(""), 0);
        assert_eq!(TokenEstimator::estimate("abcd"), 1);
        assert_eq!(TokenEstimator::estimate("abcde"), 2);
        // 3 个中文字符 -> 2 token
        assert_eq!(TokenEstimator::estimate("你好吗"), 2);
    }

    #[test]
    fn test_message_estimate_includes_tool_calls() {
        let plain = Message::assistant("run it");
        let with_call = Message::assistant_with_tool_calls(
            "run it",
            vec![ToolCall::new("c1", "shell", json!({"command": "cargo fmt --all"}))],
        );
        assert!(
            TokenEstimator::estimate_message(&with_call) > TokenEstimator::estimate_message(&plain)
        );
        assert_eq!(
            TokenEstimator::estimate_message(&Message::user("")),
            MESSAGE_OVERHEAD_TOKENS
        );
    }
}
