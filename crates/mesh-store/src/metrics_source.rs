//! # metrics_source 模块说明（§4.4 step 4 / §4.6 的外部指标源契约）
//!
//! ## 意图（Why）
//! - §4.4 "every `T_hb` publish a LoadSnapshot (via the metrics pipeline)"
//!   与 §4.6 "Metrics Aggregator ... polls the external metrics source" 描述
//!   的是同一个外部协作者的两侧：Socket Node 推入自己的读数,控制面按
//!   `T_agg` 节奏拉取。§1 把具体指标源排除在核心范围外,这里只给出两侧都
//!   要用到的最小 trait 契约,与 [`crate::session_store::SessionStore`]、
//!   [`crate::message_log::MessageLog`] 同属"外部系统消费契约"家族。

use async_trait::async_trait;
use mesh_core::error::MeshError;
use mesh_core::load::LoadSnapshot;
use mesh_core::ring::NodeId;

#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Socket Node 侧：推送自身最新读数。
    async fn push(&self, node_id: NodeId, snapshot: LoadSnapshot) -> Result<(), MeshError>;

    /// 控制面侧：拉取某节点的最新已知读数。
    async fn poll(&self, node_id: &NodeId) -> Result<Option<LoadSnapshot>, MeshError>;

    /// 控制面侧：一次性拉取所有已知节点的读数,供聚合使用。
    async fn poll_all(&self) -> Result<Vec<(NodeId, LoadSnapshot)>, MeshError>;
}

/// 供单测与本地开发使用的内存指标源。
#[derive(Default)]
pub struct InMemoryMetricsSource {
    readings: dashmap::DashMap<NodeId, LoadSnapshot>,
}

impl InMemoryMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsSource for InMemoryMetricsSource {
    async fn push(&self, node_id: NodeId, snapshot: LoadSnapshot) -> Result<(), MeshError> {
        self.readings.insert(node_id, snapshot);
        Ok(())
    }

    async fn poll(&self, node_id: &NodeId) -> Result<Option<LoadSnapshot>, MeshError> {
        Ok(self.readings.get(node_id).map(|e| *e.value()))
    }

    async fn poll_all(&self) -> Result<Vec<(NodeId, LoadSnapshot)>, MeshError> {
        Ok(self.readings.iter().map(|e| (e.key().clone(), *e.value())).collect())
    }
}
