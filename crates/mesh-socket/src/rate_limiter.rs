//! # rate_limiter 模块说明
//!
//! ## 意图（Why）
//! - §4.4 "Admission control on new attaches is governed by a leaky-bucket
//!   handshake rate limiter; excess handshakes are rejected with a
//!   retry-after hint."——漏桶是经典的准入限流算法,这里用浮点令牌桶近似
//!   实现（每毫秒补充 `rps/1000` 个令牌,上限即 `rps`,attach 消耗一个令牌）。

use std::sync::Mutex;

use mesh_core::time::Clock;

struct Bucket {
    tokens: f64,
    last_refill_ms: u64,
}

/// 漏桶式握手限流器。
pub struct HandshakeRateLimiter {
    rps: f64,
    bucket: Mutex<Bucket>,
    clock: std::sync::Arc<dyn Clock>,
}

impl HandshakeRateLimiter {
    pub fn new(rps: u32, clock: std::sync::Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            rps: rps.max(1) as f64,
            bucket: Mutex::new(Bucket {
                tokens: rps as f64,
                last_refill_ms: now,
            }),
            clock,
        }
    }

    /// 尝试获取一个令牌；成功返回 `Ok(())`,失败返回建议的重试等待毫秒数。
    pub fn try_acquire(&self) -> Result<(), u64> {
        let now = self.clock.now_ms();
        let mut bucket = self.bucket.lock().expect("rate limiter lock poisoned");

        let elapsed_ms = now.saturating_sub(bucket.last_refill_ms) as f64;
        let refill = elapsed_ms * (self.rps / 1000.0);
        bucket.tokens = (bucket.tokens + refill).min(self.rps);
        bucket.last_refill_ms = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let retry_after_ms = (deficit / (self.rps / 1000.0)).ceil().max(1.0) as u64;
            Err(retry_after_ms)
        }
    }
}
