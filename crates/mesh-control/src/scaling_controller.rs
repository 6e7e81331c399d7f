//! # scaling_controller 模块说明（C7 — Scaling Controller）
//!
//! ## 意图（Why）
//! - §4.7 的八个步骤里,紧迫度打分/扩容幅度/缩容资格/权重重算/收敛闸门都是
//!   `mesh_core::scaling` 里的纯函数；本模块只负责"领导权守卫 + 历史状态 +
//!   按 `T_decide` 节奏驱动 + 把决策转交 C8/C9"这层有状态的调度外壳,呼应
//!   §5 "The Scaling Controller is single-threaded (leader-only) and owns
//!   its historical snapshot; no locking needed" —— 因此历史状态就是普通
//!   字段,不包一层锁。

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use mesh_core::config::MeshConfig;
use mesh_core::control::RingUpdate;
use mesh_core::load::aggregate;
use mesh_core::ring::{NodeId, Ring};
use mesh_core::scaling::{classify_urgency, recompute_weights, scale_in_eligible, scale_out_magnitude, convergence_gate, ScaleOutHistory, Urgency};
use mesh_core::time::Clock;
use mesh_store::MessageLog;

use crate::aggregator::MetricsAggregator;
use crate::election::LeaderElection;
use crate::forwarder;
use crate::publisher::RingPublisher;

/// C7 的运行时句柄,拥有单线程的决策历史状态。
pub struct ScalingController {
    config: MeshConfig,
    clock: Arc<dyn Clock>,
    election: Arc<LeaderElection>,
    aggregator: Arc<MetricsAggregator>,
    publisher: Arc<RingPublisher>,
    log: Arc<dyn MessageLog>,
    ring: Arc<ArcSwap<Ring>>,
    history: ScaleOutHistory,
}

impl ScalingController {
    pub fn new(
        config: MeshConfig,
        clock: Arc<dyn Clock>,
        election: Arc<LeaderElection>,
        aggregator: Arc<MetricsAggregator>,
        publisher: Arc<RingPublisher>,
        log: Arc<dyn MessageLog>,
        ring: Arc<ArcSwap<Ring>>,
    ) -> Self {
        Self {
            config,
            clock,
            election,
            aggregator,
            publisher,
            log,
            ring,
            history: ScaleOutHistory::default(),
        }
    }

    /// 当前控制面持有的环快照,供启动时注入给 Socket Node 侧的发布路径。
    pub fn ring(&self) -> Arc<ArcSwap<Ring>> {
        self.ring.clone()
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.decide_interval);
        loop {
            ticker.tick().await;
            self.decide_once().await;
        }
    }

    /// 单个决策周期;供测试与 `run` 复用。
    pub async fn decide_once(&mut self) {
        if !self.election.is_leader() {
            return;
        }

        let loads = self.aggregator.live_snapshot();
        let n = loads.len();
        if n == 0 {
            tracing::debug!("scaling controller observed zero live nodes this cycle");
            return;
        }

        let Some(agg) = aggregate(&loads) else {
            return;
        };
        let now_ms = self.clock.now_ms();
        let urgency = classify_urgency(&agg);

        let mut scale_emitted = false;
        if urgency != Urgency::None {
            let by = scale_out_magnitude(
                urgency,
                &agg,
                &self.history,
                now_ms,
                self.config.scale_out_window.as_millis() as u64,
                self.config.max_scale_out_step,
            );
            if by > 0 {
                let reason = format!("urgency={urgency:?}");
                if let Err(err) = self.publisher.execute_scale_out(by, n as i64, reason).await {
                    tracing::warn!(error = %err, "scale-out publish failed");
                }
                self.history.last_ts = Some(now_ms);
                self.history.last_snapshot = Some(agg);
                self.history.consecutive_out_count = self.history.consecutive_out_count.saturating_add(1).min(2);
                scale_emitted = true;
            }
        } else {
            self.history.consecutive_out_count = 0;
            if scale_in_eligible(&agg, n, self.config.n_min) {
                let costs: std::collections::BTreeMap<NodeId, u64> =
                    loads.iter().map(|(id, snap)| (id.clone(), snap.active_conn)).collect();
                if let Err(err) = self.publisher.execute_scale_in(&costs, n as i64, "scale-in gates satisfied").await {
                    tracing::warn!(error = %err, "scale-in publish failed");
                }
                scale_emitted = true;
            }
        }

        let candidate_weights = recompute_weights(&loads, self.config.min_weight);

        let previous_ring = self.ring.load_full();
        let previous_ids: BTreeSet<NodeId> = previous_ring.nodes().iter().map(|n| n.node_id.clone()).collect();
        let live_ids: BTreeSet<NodeId> = loads.keys().cloned().collect();
        let removed: Vec<NodeId> = previous_ids.difference(&live_ids).cloned().collect();
        let topology_changed = !removed.is_empty() || live_ids.difference(&previous_ids).next().is_some();

        let should_publish = scale_emitted || topology_changed || !convergence_gate(&candidate_weights, &agg);
        if !should_publish {
            return;
        }

        let new_version = previous_ring.version().next();
        let new_ring = Ring::from_weights(&candidate_weights, new_version);
        self.ring.store(Arc::new(new_ring));

        let reason = if topology_changed { "topology change" } else { "weight rebalance" };
        if let Err(err) = self
            .publisher
            .publish_ring_update(RingUpdate {
                version: new_version.value(),
                weights: candidate_weights,
                reason: reason.to_string(),
                ts: now_ms,
            })
            .await
        {
            tracing::warn!(error = %err, "ring update publish failed");
        }

        for removed_node in removed {
            forwarder::spawn(removed_node, self.ring.clone(), self.log.clone(), self.config.forward_horizon, self.config.forward_quiet);
        }
    }
}
