//! # scaling 模块说明（C7 算法核）
//!
//! ## 意图（Why）
//! - §4.7 描述的紧迫度打分、扩容幅度、缩容资格、权重重算、收敛闸门全部是
//!   对 [`crate::load::AggregatedLoad`] 的纯函数变换——不涉及租约、历史状态
//!   持久化或定时调度。把它们放进 `mesh-core` 使得场景 5/6（§8 "End-to-end
//!   scenarios"）可以直接用字面输入/输出断言，无需拉起整个控制面。
//! - 跨周期的历史状态（上次扩容时间戳/快照、连续扩容计数）由调用方
//!   （`mesh-control::scaling` 的有状态控制器）持有并在每个周期喂给这里的
//!   纯函数；本模块只读不写，呼应教师仓库"CPU 密集计算同步跑在调用线程"
//!   的定位（§5）。
//!
//! ## 契约（What）
//! - [`classify_urgency`]、[`scale_out_magnitude`]、[`scale_in_eligible`]、
//!   [`recompute_weights`]、[`convergence_gate`] 均为确定性纯函数。

use std::collections::BTreeMap;

use crate::load::{AggregatedLoad, LoadSnapshot, LoadSnapshotMap};
use crate::ring::NodeId;

/// §4.7 step 3 的紧迫度分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Urgency {
    None,
    Moderate,
    High,
    Critical,
}

impl Urgency {
    pub const fn u(self) -> u32 {
        match self {
            Urgency::None => 0,
            Urgency::Moderate => 1,
            Urgency::High => 2,
            Urgency::Critical => 3,
        }
    }
}

/// C7 的决策输出；附带动机快照与可读原因，供日志与 `RingUpdate.reason` 使用。
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingDecision {
    None,
    ScaleOut { by: u32, reason: String },
    ScaleIn { reason: String },
}

/// 挑选命中的最高紧迫度档位（§4.7 step 3）。
pub fn classify_urgency(agg: &AggregatedLoad) -> Urgency {
    if agg.avg_cpu > 0.70 || agg.avg_mem > 0.75 || agg.max_cpu > 0.85 || agg.max_mem > 0.90 {
        return Urgency::Critical;
    }

    let mps_per_cpu = agg.mps_per_cpu_pct();
    let conn_per_cpu = agg.conn_per_cpu_pct();

    let lat_pressure = agg.avg_lat_ms > 500.0 && (agg.avg_cpu > 0.5 || agg.avg_mem > 0.5);
    let lag_pressure = agg.avg_lag_ms > 500.0 && (agg.avg_cpu > 0.5 || agg.avg_mem > 0.5);
    if lat_pressure || lag_pressure || mps_per_cpu < 2.0 || conn_per_cpu < 15.0 {
        return Urgency::High;
    }

    let moderate_hits = [
        agg.avg_cpu > 0.6,
        agg.avg_mem > 0.65,
        agg.avg_lat_ms > 300.0,
        mps_per_cpu < 5.0,
        conn_per_cpu < 25.0,
    ]
    .into_iter()
    .filter(|hit| *hit)
    .count();

    if moderate_hits >= 3 {
        return Urgency::Moderate;
    }

    Urgency::None
}

/// 上一次扩容事件的快照，供"加速扩容"比较使用（§4.7 step 4）。
#[derive(Debug, Clone, Default)]
pub struct ScaleOutHistory {
    pub last_ts: Option<u64>,
    pub last_snapshot: Option<AggregatedLoad>,
    pub consecutive_out_count: u32,
}

/// §4.7 step 4：在 `urgency > None` 的前提下计算扩容幅度。
pub fn scale_out_magnitude(
    urgency: Urgency,
    agg: &AggregatedLoad,
    history: &ScaleOutHistory,
    now_ms: u64,
    window_ms: u64,
    k_max: u32,
) -> u32 {
    let mut k = urgency.u();
    if k == 0 {
        return 0;
    }

    if let (Some(last_ts), Some(last)) = (history.last_ts, history.last_snapshot) {
        if now_ms.saturating_sub(last_ts) <= window_ms {
            let growth = growth_factor(agg, &last);
            if growth >= 1.5 {
                k += 2;
            } else if growth >= 1.2 {
                k += 1;
            }
        }
    }

    k += history.consecutive_out_count.min(2);
    k.min(k_max)
}

/// 五个维度增长比例中的最大值；上一周期读数为零的维度跳过（避免除零放大）。
fn growth_factor(current: &AggregatedLoad, previous: &AggregatedLoad) -> f64 {
    let ratios = [
        ratio(current.avg_cpu, previous.avg_cpu),
        ratio(current.avg_mem, previous.avg_mem),
        ratio(current.avg_mps, previous.avg_mps),
        ratio(current.avg_conn, previous.avg_conn),
        ratio(current.avg_lat_ms, previous.avg_lat_ms),
    ];
    ratios.into_iter().flatten().fold(0.0_f64, f64::max)
}

fn ratio(current: f64, previous: f64) -> Option<f64> {
    if previous <= 0.0 {
        None
    } else {
        Some(current / previous)
    }
}

/// §4.7 step 5：缩容资格判断——全部条件成立才允许 `ScaleIn(1)`。
pub fn scale_in_eligible(agg: &AggregatedLoad, live_node_count: usize, n_min: usize) -> bool {
    if live_node_count == 0 || live_node_count - 1 < n_min {
        return false;
    }

    let n = live_node_count as f64;
    let proj_cpu = agg.avg_cpu * n / (n - 1.0);
    let proj_mem = agg.avg_mem * n / (n - 1.0);

    agg.avg_cpu < 0.20
        && agg.avg_mem < 0.25
        && agg.avg_lat_ms < 100.0
        && agg.avg_lag_ms < 100.0
        && proj_cpu < 0.50
        && proj_mem < 0.55
        && agg.mps_per_cpu_pct() > 5.0
        && agg.conn_per_cpu_pct() > 30.0
}

/// 单节点负载得分，§4.7 step 6。
fn load_score(snapshot: &LoadSnapshot) -> f64 {
    0.40 * snapshot.cpu.clamp(0.0, 1.0)
        + 0.40 * snapshot.mem.clamp(0.0, 1.0)
        + 0.10 * (snapshot.p95_latency_ms / 500.0).min(1.0)
        + 0.05 * (snapshot.lag_ms / 1000.0).min(1.0)
        + 0.05 * (snapshot.active_conn as f64 / 5000.0).min(1.0)
}

/// §4.7 step 6：按负载反比重算权重，`Σ weights = 100·n`，下限 `min_weight`。
///
/// 下限落地后通过"水位填充"式的迭代把超额份额按比例收回给未触底的节点，直到
/// 总和重新逼近 `100·n`（spec 对精确再归一化算法未给出公式，属于开放问题，
/// 此处的收敛式水位填充是本仓库的选择，记录见仓库根 `DESIGN.md`）。
pub fn recompute_weights(loads: &LoadSnapshotMap, min_weight: u32) -> BTreeMap<NodeId, u32> {
    let n = loads.len();
    if n == 0 {
        return BTreeMap::new();
    }
    let target = 100.0 * n as f64;
    let floor = min_weight as f64;

    let inv_scores: Vec<(NodeId, f64)> = loads
        .iter()
        .map(|(id, snap)| (id.clone(), 1.0 / (load_score(snap) + 0.01)))
        .collect();
    let sum_inv: f64 = inv_scores.iter().map(|(_, v)| v).sum();

    let mut raw: Vec<(NodeId, f64)> = inv_scores
        .into_iter()
        .map(|(id, inv)| (id, inv / sum_inv * target))
        .collect();

    for _ in 0..8 {
        let mut floored_sum = 0.0;
        let mut any_floored = false;
        let mut free_sum = 0.0;
        for (_, w) in &raw {
            if *w < floor {
                floored_sum += floor;
                any_floored = true;
            } else {
                free_sum += *w;
            }
        }
        if !any_floored {
            break;
        }
        let remaining = (target - floored_sum).max(0.0);
        if free_sum <= 0.0 {
            break;
        }
        let scale = remaining / free_sum;
        for (_, w) in raw.iter_mut() {
            if *w < floor {
                *w = floor;
            } else {
                *w *= scale;
            }
        }
    }

    raw.into_iter()
        .map(|(id, w)| (id, w.round().max(floor) as u32))
        .collect()
}

/// §4.7 step 7：判断是否应跳过发布（权重更新静默）。
///
/// 负载离散度取集群聚合 `avgCpu`/`avgMem` 之间的差距（而非跨节点分布），
/// 与权重闸门共用"单一聚合读数即可判定"的简洁口径——spec 原文未消歧义，
/// 这是一处记录在 `DESIGN.md` 的 Open Question 决策。
pub fn convergence_gate(candidate_weights: &BTreeMap<NodeId, u32>, agg: &AggregatedLoad) -> bool {
    if candidate_weights.is_empty() {
        return true;
    }
    let max_w = *candidate_weights.values().max().unwrap() as f64;
    let min_w = *candidate_weights.values().min().unwrap() as f64;
    let weight_spread = (max_w - min_w) / 100.0;

    let load_spread = (agg.avg_cpu.max(agg.avg_mem) - agg.avg_cpu.min(agg.avg_mem)).abs();
    let healthy = agg.avg_cpu < 0.70 && agg.avg_mem < 0.70;

    weight_spread < 0.15 && load_spread < 0.25 && healthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::aggregate;

    fn agg(avg_cpu: f64, avg_mem: f64, max_cpu: f64, max_mem: f64) -> AggregatedLoad {
        AggregatedLoad {
            avg_cpu,
            max_cpu,
            avg_mem,
            max_mem,
            avg_mps: 50.0,
            avg_conn: 500.0,
            avg_lat_ms: 50.0,
            avg_lag_ms: 0.0,
            node_count: 3,
        }
    }

    #[test]
    fn critical_urgency_on_high_avg_cpu() {
        let load = agg(0.75, 0.60, 0.80, 0.70);
        assert_eq!(classify_urgency(&load), Urgency::Critical);
    }

    #[test]
    fn healthy_cluster_is_no_urgency() {
        let load = agg(0.20, 0.20, 0.25, 0.25);
        assert_eq!(classify_urgency(&load), Urgency::None);
    }

    /// Scenario 5 — critical scale-out with acceleration (§8).
    #[test]
    fn scenario_critical_scale_out_with_acceleration() {
        let cycle1 = agg(0.75, 0.60, 0.75, 0.60);
        let urgency1 = classify_urgency(&cycle1);
        assert_eq!(urgency1, Urgency::Critical);
        let history = ScaleOutHistory::default();
        let k1 = scale_out_magnitude(urgency1, &cycle1, &history, 0, 300_000, 5);
        assert_eq!(k1, 3);

        let history_after = ScaleOutHistory {
            last_ts: Some(0),
            last_snapshot: Some(cycle1),
            consecutive_out_count: 0,
        };
        let cycle2 = agg(0.82, 0.68, 0.82, 0.68);
        let urgency2 = classify_urgency(&cycle2);
        assert_eq!(urgency2, Urgency::Critical);
        // two minutes later, within the 5 minute window
        let k2 = scale_out_magnitude(urgency2, &cycle2, &history_after, 120_000, 300_000, 5);
        assert_eq!(k2, 5);
    }

    #[test]
    fn scale_in_requires_all_gates_and_n_min() {
        let load = agg(0.10, 0.10, 0.15, 0.15);
        assert!(scale_in_eligible(&load, 3, 2));
        assert!(!scale_in_eligible(&load, 2, 2), "removing last-but-n_min node forbidden");
    }

    #[test]
    fn scale_in_blocked_by_high_cpu() {
        let load = agg(0.30, 0.10, 0.35, 0.15);
        assert!(!scale_in_eligible(&load, 5, 2));
    }

    #[test]
    fn single_node_weight_is_trivially_full_share() {
        let mut loads = LoadSnapshotMap::new();
        loads.insert(
            NodeId::from("solo"),
            LoadSnapshot {
                cpu: 0.9,
                mem: 0.9,
                active_conn: 100,
                mps: 10.0,
                p95_latency_ms: 10.0,
                lag_ms: 0.0,
                ts: 0,
            },
        );
        let weights = recompute_weights(&loads, 10);
        assert_eq!(weights.get(&NodeId::from("solo")), Some(&100));
    }

    #[test]
    fn min_weight_floor_prevents_starvation() {
        let mut loads = LoadSnapshotMap::new();
        loads.insert(
            NodeId::from("hot"),
            LoadSnapshot {
                cpu: 0.99,
                mem: 0.99,
                active_conn: 5000,
                mps: 1000.0,
                p95_latency_ms: 500.0,
                lag_ms: 1000.0,
                ts: 0,
            },
        );
        loads.insert(
            NodeId::from("idle"),
            LoadSnapshot {
                cpu: 0.01,
                mem: 0.01,
                active_conn: 0,
                mps: 0.0,
                p95_latency_ms: 0.0,
                lag_ms: 0.0,
                ts: 0,
            },
        );
        let weights = recompute_weights(&loads, 10);
        assert!(*weights.get(&NodeId::from("hot")).unwrap() >= 10);
        assert!(*weights.get(&NodeId::from("idle")).unwrap() > *weights.get(&NodeId::from("hot")).unwrap());
    }

    /// Scenario 6 — convergence silence (§8).
    #[test]
    fn scenario_convergence_silence() {
        let mut loads = LoadSnapshotMap::new();
        for (id, cpu) in [("a", 0.38), ("b", 0.42), ("c", 0.38)] {
            loads.insert(
                NodeId::from(id),
                LoadSnapshot {
                    cpu,
                    mem: 0.40,
                    active_conn: 500,
                    mps: 50.0,
                    p95_latency_ms: 50.0,
                    lag_ms: 0.0,
                    ts: 0,
                },
            );
        }
        let snapshot_map: LoadSnapshotMap = loads.clone();
        let aggregated = aggregate(&snapshot_map).unwrap();
        let candidate = recompute_weights(&loads, 10);
        assert!(convergence_gate(&candidate, &aggregated), "expected silent convergence");
    }

    #[test]
    fn topology_change_is_not_gated_by_this_function() {
        // convergence_gate only evaluates weight/load spread; topology-change
        // publication is an unconditional branch the caller takes before
        // ever consulting this gate (§4.7 step 7).
        let mut loads = LoadSnapshotMap::new();
        loads.insert(
            NodeId::from("a"),
            LoadSnapshot {
                cpu: 0.05,
                mem: 0.05,
                active_conn: 10,
                mps: 5.0,
                p95_latency_ms: 5.0,
                lag_ms: 0.0,
                ts: 0,
            },
        );
        let candidate = recompute_weights(&loads, 10);
        let aggregated = aggregate(&loads).unwrap();
        assert!(convergence_gate(&candidate, &aggregated));
    }
}
