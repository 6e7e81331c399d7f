//! # metrics 模块说明
//!
//! ## 意图（Why）
//! - §4.4/§7 反复要求"打点计数器"：`drops{reason=buffer_full}`、
//!   `drops{reason=publish_failed}`、`drops{reason=handshake_rate_exceeded}`。
//!   本仓库不引入完整的指标导出管线（超出 §1 的范围）,只保留这些计数器
//!   供测试断言与未来接入真实指标系统时读取。

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct NodeMetrics {
    pub drops_buffer_full: AtomicU64,
    pub drops_publish_failed: AtomicU64,
    pub drops_handshake_rate_exceeded: AtomicU64,
    pub drops_invariant: AtomicU64,
}

impl NodeMetrics {
    pub fn bump_buffer_full(&self) {
        self.drops_buffer_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump_publish_failed(&self) {
        self.drops_publish_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump_handshake_rate_exceeded(&self) {
        self.drops_handshake_rate_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bump_invariant(&self) {
        self.drops_invariant.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NodeMetricsSnapshot {
        NodeMetricsSnapshot {
            drops_buffer_full: self.drops_buffer_full.load(Ordering::Relaxed),
            drops_publish_failed: self.drops_publish_failed.load(Ordering::Relaxed),
            drops_handshake_rate_exceeded: self.drops_handshake_rate_exceeded.load(Ordering::Relaxed),
            drops_invariant: self.drops_invariant.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeMetricsSnapshot {
    pub drops_buffer_full: u64,
    pub drops_publish_failed: u64,
    pub drops_handshake_rate_exceeded: u64,
    pub drops_invariant: u64,
}
