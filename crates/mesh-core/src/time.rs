//! # time 模块说明
//!
//! ## 意图（Why）
//! - §3 的 `Ts` 字段与 §4.7 的扩缩容节奏都以"单调毫秒"为单位；直接调用
//!   `SystemTime::now()` 会让扩缩容控制器、重放缓冲在单元测试中难以构造
//!   确定性场景。
//! - 抽象出 [`Clock`] trait，生产环境使用 [`SystemClock`]，测试使用
//!   [`FixedClock`] / [`SteppedClock`] 固定或步进时间。
//!
//! ## 契约（What）
//! - `now_ms`：返回自 `UNIX_EPOCH` 起的毫秒数，单调不减（在 `SystemClock` 实现中
//!   依赖系统时钟本身的单调性假设；若系统时钟回拨，调用方不应依赖严格单调）。

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 时钟抽象，便于在控制器与重放缓冲测试中注入确定性时间。
pub trait Clock: Send + Sync + 'static {
    /// 当前时间，单位毫秒。
    fn now_ms(&self) -> u64;
}

/// 基于系统时钟的默认实现。
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// 固定在某个时间点的时钟，供单元测试使用。
#[derive(Debug)]
pub struct FixedClock(AtomicI64);

impl FixedClock {
    pub fn new(ms: u64) -> Self {
        Self(AtomicI64::new(ms as i64))
    }

    /// 将时钟向前推进，模拟测试中的时间流逝。
    pub fn advance(&self, delta_ms: u64) {
        self.0.fetch_add(delta_ms as i64, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms as i64, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst) as u64
    }
}
