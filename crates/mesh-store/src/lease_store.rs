//! # lease_store 模块说明（§4.5 Leader Election 的外部协作者契约）
//!
//! ## 意图（Why）
//! - §4.5 描述的是单一租约资源上的续租协议，没有规定持久化后端；与
//!   [`crate::session_store::SessionStore`]、[`crate::message_log::MessageLog`]、
//!   [`crate::metrics_source::MetricsSource`] 同属"外部系统消费契约"家族,
//!   这里补上控制面缺的那一块。
//! - 契约刻意收窄为"尝试获取/续租"与"释放"两个动作——不暴露底层 CAS 原语,
//!   调用方（`mesh-control::election`）不需要知道后端是单行 DynamoDB 条件写入
//!   还是 etcd lease。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mesh_core::error::MeshError;
use mesh_core::time::Clock;

/// 一次 `try_acquire` 的结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// 调用方现在持有租约（新获取或续租成功）,租约将在 `expires_at_ms` 到期。
    Acquired { expires_at_ms: u64 },
    /// 租约当前被另一个持有者占用且未过期。
    HeldByOther,
}

/// 控制面对租约资源的消费契约（§4.5）。
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// 尝试获取或续租；幂等于同一 `holder_id` 的重复调用（续租）。
    async fn try_acquire(&self, holder_id: &str, lease_dur: Duration) -> Result<LeaseOutcome, MeshError>;

    /// 主动放弃租约,仅当当前持有者确实是 `holder_id` 时生效。
    async fn release(&self, holder_id: &str) -> Result<(), MeshError>;
}

struct LeaseEntry {
    holder_id: String,
    expires_at_ms: u64,
}

/// 供单测与本地开发使用的内存版租约资源——单进程内的互斥量,不是跨进程协调。
pub struct InMemoryLeaseStore {
    clock: Arc<dyn Clock>,
    current: std::sync::Mutex<Option<LeaseEntry>>,
}

impl InMemoryLeaseStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            current: std::sync::Mutex::new(None),
        }
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn try_acquire(&self, holder_id: &str, lease_dur: Duration) -> Result<LeaseOutcome, MeshError> {
        let now = self.clock.now_ms();
        let mut guard = self.current.lock().expect("lease lock poisoned");

        let grant = match guard.as_ref() {
            Some(entry) if entry.holder_id == holder_id => true,
            Some(entry) if entry.expires_at_ms > now => false,
            _ => true,
        };

        if !grant {
            return Ok(LeaseOutcome::HeldByOther);
        }

        let expires_at_ms = now + lease_dur.as_millis() as u64;
        *guard = Some(LeaseEntry {
            holder_id: holder_id.to_string(),
            expires_at_ms,
        });
        Ok(LeaseOutcome::Acquired { expires_at_ms })
    }

    async fn release(&self, holder_id: &str) -> Result<(), MeshError> {
        let mut guard = self.current.lock().expect("lease lock poisoned");
        if let Some(entry) = guard.as_ref() {
            if entry.holder_id == holder_id {
                *guard = None;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::time::FixedClock;

    fn store(now_ms: u64) -> (InMemoryLeaseStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(now_ms));
        (InMemoryLeaseStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn first_acquirer_wins_an_unheld_lease() {
        let (store, _clock) = store(0);
        let outcome = store.try_acquire("a", Duration::from_secs(15)).await.unwrap();
        assert!(matches!(outcome, LeaseOutcome::Acquired { expires_at_ms: 15_000 }));
    }

    /// R6 — at most one holder while the lease is live.
    #[tokio::test]
    async fn second_process_is_rejected_while_lease_is_live() {
        let (store, _clock) = store(0);
        store.try_acquire("a", Duration::from_secs(15)).await.unwrap();
        let outcome = store.try_acquire("b", Duration::from_secs(15)).await.unwrap();
        assert_eq!(outcome, LeaseOutcome::HeldByOther);
    }

    #[tokio::test]
    async fn holder_can_renew_before_expiry() {
        let (store, clock) = store(0);
        store.try_acquire("a", Duration::from_secs(15)).await.unwrap();
        clock.advance(10_000);
        let outcome = store.try_acquire("a", Duration::from_secs(15)).await.unwrap();
        assert!(matches!(outcome, LeaseOutcome::Acquired { expires_at_ms: 25_000 }));
    }

    #[tokio::test]
    async fn lease_becomes_available_after_expiry() {
        let (store, clock) = store(0);
        store.try_acquire("a", Duration::from_secs(15)).await.unwrap();
        clock.advance(15_001);
        let outcome = store.try_acquire("b", Duration::from_secs(15)).await.unwrap();
        assert!(matches!(outcome, LeaseOutcome::Acquired { .. }));
    }

    #[tokio::test]
    async fn release_frees_the_lease_for_others() {
        let (store, _clock) = store(0);
        store.try_acquire("a", Duration::from_secs(15)).await.unwrap();
        store.release("a").await.unwrap();
        let outcome = store.try_acquire("b", Duration::from_secs(15)).await.unwrap();
        assert!(matches!(outcome, LeaseOutcome::Acquired { .. }));
    }

    #[tokio::test]
    async fn release_by_non_holder_is_a_noop() {
        let (store, _clock) = store(0);
        store.try_acquire("a", Duration::from_secs(15)).await.unwrap();
        store.release("b").await.unwrap();
        let outcome = store.try_acquire("b", Duration::from_secs(15)).await.unwrap();
        assert_eq!(outcome, LeaseOutcome::HeldByOther);
    }
}
