//! 循环检测：最近 N 个工具调用签名（名称 + 规范化参数）中同一签名出现次数达到阈值即判定为死循环
//!
//! 按批次记录：最新一批里任一签名达到阈值都算，批内其他调用变化不影响判定。

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct LoopDetector {
    window: usize,
    threshold: usize,
    recent: VecDeque<String>,
    last_batch: Vec<String>,
}

impl LoopDetector {
    pub fn new(window: usize, threshold: usize) -> Self {
        let threshold = threshold.max(2);
        Self {
            window: window.max(threshold),
            threshold,
            recent: VecDeque::new(),
            last_batch: Vec::new(),
        }
    }

    pub fn record(&mut self, signature: impl Into<String>) {
        self.record_batch([signature.into()]);
    }

    /// 记录一轮迭代中的全部签名（调用方负责批内去重）
    pub fn record_batch(&mut self, signatures: impl IntoIterator<Item = String>) {
        self.last_batch.clear();
        for signature in signatures {
            self.recent.push_back(signature.clone());
            self.last_batch.push(signature);
        }
        while self.recent.len() > self.window {
            self.recent.pop_front();
        }
    }

    /// 最新一批中第一个在窗口内重复达到阈值的签名
    pub fn detect(&self) -> Option<String> {
        self.last_batch
            .iter()
            .find(|signature| self.recent.iter().filter(|s| s == signature).count() >= self.threshold)
            .cloned()
    }

    pub fn reset(&mut self) {
        self.recent.clear();
        self.last_batch.clear();
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}
