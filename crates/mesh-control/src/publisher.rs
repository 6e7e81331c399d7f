//! # publisher 模块说明（C8 — Ring Publisher）
//!
//! ## 意图（Why）
//! - §4.8：把环版本/权重/动作序列化发布到控制主题,并在缩容时按固定顺序
//!   调用编排器（先写节点"成本"提示,再请求副本数递减）。编排器本身
//!   （真正去调云厂商 API 伸缩节点）不在本网格的范围内,这里只给出一个
//!   `ScaleOrchestrator` trait 边界,呼应教师仓库把"信令协议细节"挡在
//!   trait 对象之后的做法（参见 `mesh-store` 的外部协作者契约家族）。
//! - 发布重试沿用 `mesh-socket::publish_retry` 的指数退避预算模式——
//!   两个 crate 各自实现一份,避免控制面反过来依赖 Socket Node 运行时 crate。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mesh_core::control::{ControlMessage, DrainDirective, RingUpdate, ScaleAction, ScaleSignal};
use mesh_core::error::{CapacityKind, MeshError};
use mesh_core::ring::NodeId;
use mesh_core::time::Clock;
use mesh_store::{MessageLog, CONTROL_TOPIC};

/// C8 对编排器（云厂商/容器平台扩缩容 API）的消费契约。
///
/// 真实节点的创建/销毁超出本网格的范围；这里只描述控制面需要的两个动作。
#[async_trait]
pub trait ScaleOrchestrator: Send + Sync {
    /// 设置期望的 Socket Node 副本数。
    async fn set_replica_count(&self, desired_n: u32) -> Result<(), MeshError>;

    /// 缩容前为节点写入"成本"提示,值越大越优先被移除（§4.8 `cost = activeConn`）。
    async fn set_cost_hint(&self, node_id: &NodeId, cost: u64) -> Result<(), MeshError>;
}

/// 仅记录日志的编排器,供没有真实云平台对接的部署/测试使用。
pub struct NoopOrchestrator;

#[async_trait]
impl ScaleOrchestrator for NoopOrchestrator {
    async fn set_replica_count(&self, desired_n: u32) -> Result<(), MeshError> {
        tracing::info!(desired_n, "noop orchestrator: replica count request observed only");
        Ok(())
    }

    async fn set_cost_hint(&self, node_id: &NodeId, cost: u64) -> Result<(), MeshError> {
        tracing::info!(%node_id, cost, "noop orchestrator: cost hint observed only");
        Ok(())
    }
}

/// C8 的运行时句柄。
pub struct RingPublisher {
    log: Arc<dyn MessageLog>,
    orchestrator: Arc<dyn ScaleOrchestrator>,
    clock: Arc<dyn Clock>,
    publish_retry_budget: Duration,
}

impl RingPublisher {
    pub fn new(log: Arc<dyn MessageLog>, orchestrator: Arc<dyn ScaleOrchestrator>, clock: Arc<dyn Clock>, publish_retry_budget: Duration) -> Self {
        Self {
            log,
            orchestrator,
            clock,
            publish_retry_budget,
        }
    }

    pub async fn publish_ring_update(&self, update: RingUpdate) -> Result<(), MeshError> {
        let msg = ControlMessage::RingUpdate(update);
        self.publish(&msg).await
    }

    pub async fn publish_drain_directive(&self, node_id: NodeId, deadline: u64, reason: impl Into<String>) -> Result<(), MeshError> {
        let msg = ControlMessage::DrainDirective(DrainDirective {
            node_id,
            deadline,
            reason: reason.into(),
        });
        self.publish(&msg).await
    }

    /// §4.8 scale-out publication: request the extra replicas, then broadcast the signal.
    pub async fn execute_scale_out(&self, by: u32, from_n: i64, reason: impl Into<String>) -> Result<(), MeshError> {
        let to_n = from_n + by as i64;
        self.orchestrator.set_replica_count(to_n.max(0) as u32).await?;
        self.publish_scale_signal(ScaleAction::Out, from_n, to_n, reason).await
    }

    /// §4.8 scale-in publication order: (i) write per-node cost hints so the
    /// orchestrator removes the least-loaded node first, (ii) request the
    /// replica decrement, (iii) broadcast the signal. Forwarder startup is
    /// driven separately once the node's removal shows up as a topology diff.
    pub async fn execute_scale_in(&self, costs: &std::collections::BTreeMap<NodeId, u64>, from_n: i64, reason: impl Into<String>) -> Result<(), MeshError> {
        for (node_id, cost) in costs {
            self.orchestrator.set_cost_hint(node_id, *cost).await?;
        }
        let to_n = (from_n - 1).max(0);
        self.orchestrator.set_replica_count(to_n as u32).await?;
        self.publish_scale_signal(ScaleAction::In, from_n, to_n, reason).await
    }

    async fn publish_scale_signal(&self, action: ScaleAction, from_n: i64, to_n: i64, reason: impl Into<String>) -> Result<(), MeshError> {
        let msg = ControlMessage::ScaleSignal(ScaleSignal {
            action,
            from_n,
            to_n,
            reason: reason.into(),
            ts: self.clock.now_ms(),
        });
        self.publish(&msg).await
    }

    async fn publish(&self, msg: &ControlMessage) -> Result<(), MeshError> {
        let bytes = serde_json::to_vec(msg).map_err(|e| MeshError::invariant("control.publish", e.to_string()))?;
        publish_with_retry(self.log.as_ref(), CONTROL_TOPIC, "control", bytes, self.publish_retry_budget).await
    }
}

async fn publish_with_retry(log: &dyn MessageLog, topic: &str, key: &str, bytes: Vec<u8>, budget: Duration) -> Result<(), MeshError> {
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
    use mesh_core::time::FixedClock;
    use mesh_store::InMemoryMessageLog;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    #[derive(Default)]
    struct RecordingOrchestrator {
        replicas: AtomicU32,
        last_cost_node: std::sync::Mutex<Option<NodeId>>,
        last_cost: AtomicU64,
    }

    #[async_trait]
    impl ScaleOrchestrator for RecordingOrchestrator {
        async fn set_replica_count(&self, desired_n: u32) -> Result<(), MeshError> {
            self.replicas.store(desired_n, Ordering::SeqCst);
            Ok(())
        }

        async fn set_cost_hint(&self, node_id: &NodeId, cost: u64) -> Result<(), MeshError> {
            *self.last_cost_node.lock().unwrap() = Some(node_id.clone());
            self.last_cost.store(cost, Ordering::SeqCst);
            Ok(())
        }
    }

    fn publisher(log: Arc<InMemoryMessageLog>, orchestrator: Arc<RecordingOrchestrator>) -> RingPublisher {
        RingPublisher::new(log, orchestrator, Arc::new(FixedClock::new(0)), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn ring_update_is_published_to_control_topic() {
        let log = Arc::new(InMemoryMessageLog::new());
        let mut rx = log.subscribe(CONTROL_TOPIC, "test").await.unwrap();
        let publisher = publisher(log.clone(), Arc::new(RecordingOrchestrator::default()));

        let mut weights = std::collections::BTreeMap::new();
        weights.insert(NodeId::from("a"), 100);
        publisher
            .publish_ring_update(RingUpdate {
                version: 2,
                weights,
                reason: "topology change".into(),
                ts: 0,
            })
            .await
            .unwrap();

        let record = rx.recv().await.unwrap();
        let msg: ControlMessage = serde_json::from_slice(&record.record.bytes).unwrap();
        assert!(matches!(msg, ControlMessage::RingUpdate(_)));
    }

    #[tokio::test]
    async fn scale_out_requests_replicas_before_broadcasting() {
        let log = Arc::new(InMemoryMessageLog::new());
        let orchestrator = Arc::new(RecordingOrchestrator::default());
        let mut rx = log.subscribe(CONTROL_TOPIC, "test").await.unwrap();
        let publisher = publisher(log.clone(), orchestrator.clone());

        publisher.execute_scale_out(3, 2, "critical urgency").await.unwrap();
        assert_eq!(orchestrator.replicas.load(Ordering::SeqCst), 5);

        let record = rx.recv().await.unwrap();
        let msg: ControlMessage = serde_json::from_slice(&record.record.bytes).unwrap();
        match msg {
            ControlMessage::ScaleSignal(signal) => {
                assert_eq!(signal.action, ScaleAction::Out);
                assert_eq!(signal.from_n, 2);
                assert_eq!(signal.to_n, 5);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn scale_in_writes_cost_hints_before_decrementing_replicas() {
        let log = Arc::new(InMemoryMessageLog::new());
        let orchestrator = Arc::new(RecordingOrchestrator::default());
        let mut rx = log.subscribe(CONTROL_TOPIC, "test").await.unwrap();
        let publisher = publisher(log.clone(), orchestrator.clone());

        let mut costs = std::collections::BTreeMap::new();
        costs.insert(NodeId::from("idle-1"), 12);
        publisher.execute_scale_in(&costs, 3, "all gates satisfied").await.unwrap();
        assert_eq!(*orchestrator.last_cost_node.lock().unwrap(), Some(NodeId::from("idle-1")));
        assert_eq!(orchestrator.last_cost.load(Ordering::SeqCst), 12);
        assert_eq!(orchestrator.replicas.load(Ordering::SeqCst), 2);

        let record = rx.recv().await.unwrap();
        let msg: ControlMessage = serde_json::from_slice(&record.record.bytes).unwrap();
        assert!(matches!(msg, ControlMessage::ScaleSignal(s) if s.action == ScaleAction::In));
    }
}
