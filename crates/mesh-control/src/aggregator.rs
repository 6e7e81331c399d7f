//! # aggregator 模块说明（C6 — Metrics Aggregator）
//!
//! ## 意图（Why）
//! - §4.6：按 `T_agg` 节奏从外部指标源拉取每个存活节点的负载读数,产出一份
//!   集群 `LoadSnapshotMap`。缺失的读数沿用上一次已知值,直到 `T_stale`
//!   才把节点视为缺席（供扩缩容决策退场用,而不是立即抖动）。
//! - 跨节点聚合本身（平均值/最大值/效率比）是纯函数,已经在
//!   `mesh_core::load::aggregate` 里实现并测试过；本模块只负责"维护一份
//!   带陈旧度的读数表",把结果喂给 [`crate::scaling_controller::ScalingController`]。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mesh_core::load::{LoadSnapshot, LoadSnapshotMap};
use mesh_core::ring::NodeId;
use mesh_core::time::Clock;
use mesh_store::MetricsSource;

struct Entry {
    snapshot: LoadSnapshot,
    last_seen_ms: u64,
}

/// C6 的运行时句柄：持有"节点 -> 最新读数 + 最后更新时刻"的表。
pub struct MetricsAggregator {
    source: Arc<dyn MetricsSource>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
    readings: DashMap<NodeId, Entry>,
}

impl MetricsAggregator {
    pub fn new(source: Arc<dyn MetricsSource>, clock: Arc<dyn Clock>, stale_after: Duration) -> Self {
        Self {
            source,
            clock,
            stale_after,
            readings: DashMap::new(),
        }
    }

    /// 后台轮询循环：按 `aggregate_interval` 节奏拉取并刷新读数表。
    pub async fn run(&self, aggregate_interval: Duration) {
        let mut ticker = tokio::time::interval(aggregate_interval);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// 单次拉取;供测试与 `run` 复用。
    pub async fn poll_once(&self) {
        match self.source.poll_all().await {
            Ok(readings) => {
                let now = self.clock.now_ms();
                for (node_id, snapshot) in readings {
                    self.readings.insert(node_id, Entry { snapshot, last_seen_ms: now });
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "metrics source poll_all failed, keeping last known readings");
            }
        }
    }

    /// 当前仍在 `T_stale` 窗口内的存活节点负载表（§4.6 "thereafter absent"）。
    pub fn live_snapshot(&self) -> LoadSnapshotMap {
        let now = self.clock.now_ms();
        let stale_ms = self.stale_after.as_millis() as u64;
        let mut dropped = Vec::new();
        let mut map = LoadSnapshotMap::new();
        for entry in self.readings.iter() {
            if now.saturating_sub(entry.last_seen_ms) > stale_ms {
                dropped.push(entry.key().clone());
                continue;
            }
            map.insert(entry.key().clone(), entry.snapshot);
        }
        for node_id in dropped {
            self.readings.remove(&node_id);
        }
        map
    }
}
