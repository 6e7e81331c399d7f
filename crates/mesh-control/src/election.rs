//! # election 模块说明（C5 — Leader Election）
//!
//! ## 意图（Why）
//! - §4.5：基于单一租约资源的单写者选举。持有者每 `lease_renew` 续租一次,
//!   租约时长 `lease_dur`；续租失败或进程来不及续租,`isLeader` 在最坏情况下
//!   于 `lease_dur` 内转为 `false`,C7/C8 据此立即停止发布。
//! - 续租循环沿用 `mesh-socket::node` 里"一个 `Arc<Self>` 背景任务 + tick
//!   间隔"的组织方式；租约资源本身是 `mesh-store::LeaseStore`,与会话存储、
//!   消息日志同属外部协作者契约,不在本 crate 内实现持久化。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mesh_store::{LeaseOutcome, LeaseStore};
use tokio::sync::Notify;

/// C5 的运行时句柄：持有当前选举状态,供 C7/C8 查询。
pub struct LeaderElection {
    holder_id: String,
    lease_dur: Duration,
    lease_renew: Duration,
    lease_store: Arc<dyn LeaseStore>,
    is_leader: AtomicBool,
    stop: Notify,
}

impl LeaderElection {
    pub fn new(holder_id: impl Into<String>, lease_dur: Duration, lease_renew: Duration, lease_store: Arc<dyn LeaseStore>) -> Arc<Self> {
        Arc::new(Self {
            holder_id: holder_id.into(),
            lease_dur,
            lease_renew,
            lease_store,
            is_leader: AtomicBool::new(false),
            stop: Notify::new(),
        })
    }

    /// 当前是否持有租约；C7/C8 在每个决策/发布周期开头读取一次。
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Acquire)
    }

    /// 后台续租循环：按 `lease_renew` 节奏尝试获取/续租,直到 `stop()` 被调用。
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.lease_renew);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_once().await;
                }
                _ = self.stop.notified() => {
                    let _ = self.lease_store.release(&self.holder_id).await;
                    self.is_leader.store(false, Ordering::Release);
                    return;
                }
            }
        }
    }

    /// 尝试获取/续租一次,立即更新 [`is_leader`](Self::is_leader)；`run` 的
    /// 每个 tick 都调用它,测试也可以直接驱动而不必等待定时器。
    pub async fn tick_once(&self) {
        match self.lease_store.try_acquire(&self.holder_id, self.lease_dur).await {
            Ok(LeaseOutcome::Acquired { expires_at_ms }) => {
                if !self.is_leader.swap(true, Ordering::AcqRel) {
                    tracing::info!(holder = %self.holder_id, expires_at_ms, "acquired leadership");
                }
            }
            Ok(LeaseOutcome::HeldByOther) => {
                if self.is_leader.swap(false, Ordering::AcqRel) {
                    tracing::warn!(holder = %self.holder_id, "lost leadership to another holder");
                }
            }
            Err(err) => {
                // 租约存储瞬时不可用：保守地放弃领导权,宁可短暂无主也不要双主。
                if self.is_leader.swap(false, Ordering::AcqRel) {
                    tracing::warn!(holder = %self.holder_id, error = %err, "lease renewal failed, stepping down");
                }
            }
        }
    }

    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::time::FixedClock;
    use mesh_store::InMemoryLeaseStore;

    fn lease_store(now_ms: u64) -> Arc<InMemoryLeaseStore> {
        Arc::new(InMemoryLeaseStore::new(Arc::new(FixedClock::new(now_ms))))
    }

    #[tokio::test]
    async fn first_holder_becomes_leader_on_first_tick() {
        let store = lease_store(0);
        let election = LeaderElection::new("a", Duration::from_secs(15), Duration::from_secs(10), store);
        assert!(!election.is_leader());
        election.tick_once().await;
        assert!(election.is_leader());
    }

    /// R6 — a second process cannot also become leader while the lease is live.
    #[tokio::test]
    async fn second_process_never_sees_itself_as_leader_while_first_holds_lease() {
        let store = lease_store(0);
        let a = LeaderElection::new("a", Duration::from_secs(15), Duration::from_secs(10), store.clone());
        let b = LeaderElection::new("b", Duration::from_secs(15), Duration::from_secs(10), store);
        a.tick_once().await;
        b.tick_once().await;
        assert!(a.is_leader());
        assert!(!b.is_leader());
    }

    #[tokio::test]
    async fn stepping_down_releases_the_lease_for_others() {
        let store = lease_store(0);
        let a = Arc::new(LeaderElection {
            holder_id: "a".into(),
            lease_dur: Duration::from_secs(15),
            lease_renew: Duration::from_secs(10),
            lease_store: store.clone(),
            is_leader: AtomicBool::new(false),
            stop: Notify::new(),
        });
        a.tick_once().await;
        assert!(a.is_leader());
        a.lease_store.release("a").await.unwrap();
        a.is_leader.store(false, Ordering::Release);

        let b = LeaderElection::new("b", Duration::from_secs(15), Duration::from_secs(10), store);
        b.tick_once().await;
        assert!(b.is_leader());
    }
}
