//! 编排过程事件：统一的进度流，供 CLI / TUI / 协议桥展示思考、工具调用、压缩与最终结果

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    IterationStarted,
    Thinking,
    MessageChunk,
    Answer,
    ToolCall,
    ToolResult,
    Compaction,
    Retry,
    AutoContinue,
    Finished,
    Error,
}

/// 单条进度更新
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub kind: ProgressKind,
    pub message: String,
    /// 是否作为回复内容流式展示给用户
    pub stream_to_user: bool,
    /// 是否显示在状态栏
    pub show_as_status: bool,
}

impl ProgressUpdate {
    pub fn status(kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stream_to_user: false,
            show_as_status: true,
        }
    }

    /// 回复片段
    pub fn stream(text: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::MessageChunk,
            message: text.into(),
            stream_to_user: true,
            show_as_status: false,
        }
    }

    pub fn log(kind: ProgressKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stream_to_user: false,
            show_as_status: false,
        }
    }
}

/// 进度发送端；未接前端时静默丢弃
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, update: ProgressUpdate) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(update);
        }
    }
}
