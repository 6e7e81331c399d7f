//! # publish_retry 模块说明
//!
//! ## 意图（Why）
//! - §4.4 "Failure semantics"：日志发布失败时指数退避重试,直到 `T_pub_max`
//!   预算耗尽才放弃并计入 `drops{reason=publish_failed}`；发送方不会被
//!   通知（at-least-once 不足以保证回执）。

use std::time::Duration;

use mesh_core::error::{CapacityKind, MeshError};
use mesh_store::MessageLog;

/// 带指数退避的发布重试;预算耗尽后返回 [`MeshError::Capacity`]
/// （`CapacityKind::PublishFailed`）,调用方据此计入丢弃计数。
pub async fn publish_with_retry(
    log: &dyn MessageLog,
    topic: &str,
    key: &str,
    bytes: Vec<u8>,
    budget: Duration,
) -> Result<(), MeshError> {
    let mut backoff = Duration::from_millis(50);
    let max_backoff = Duration::from_secs(5);
    let deadline = tokio::time::Instant::now() + budget;

    loop {
        match log.publish(topic, key, bytes.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(MeshError::capacity(
                        CapacityKind::PublishFailed,
                        format!("publish to `{topic}` exhausted retry budget: {err}"),
                    ));
                }
                tokio::time::sleep(backoff.min(max_backoff)).await;
                backoff = (backoff * 2).min(max_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mesh_store::RecordHandle;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    struct FlakyLog {
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl MessageLog for FlakyLog {
        async fn publish(&self, _topic: &str, _key: &str, _bytes: Vec<u8>) -> Result<(), MeshError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                Err(MeshError::transient("publish", "simulated timeout"))
            } else {
                Ok(())
            }
        }

        async fn subscribe(&self, _topic: &str, _group_id: &str) -> Result<mpsc::Receiver<RecordHandle>, MeshError> {
            unimplemented!("not exercised by publish_retry tests")
        }

        async fn create_topic(&self, _name: &str, _partitions: u32, _replication: u32) -> Result<(), MeshError> {
            Ok(())
        }

        async fn list_group_lag(&self, _group_id: &str) -> Result<u64, MeshError> {
            Ok(0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures_within_budget() {
        let log = FlakyLog {
            fail_times: AtomicU32::new(2),
        };
        let result = publish_with_retry(&log, "t1", "r1", vec![1], Duration::from_secs(5)).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget_exhausted() {
        let log = FlakyLog {
            fail_times: AtomicU32::new(u32::MAX),
        };
        let result = publish_with_retry(&log, "t1", "r1", vec![1], Duration::from_millis(200)).await;
        assert!(matches!(result, Err(MeshError::Capacity { .. })));
    }
}
