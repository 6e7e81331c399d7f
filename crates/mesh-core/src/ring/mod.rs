//! # ring 模块说明（C1 — Ring）
//!
//! ## 意图（Why）
//! - 实现 §4.1 的加权一致性哈希环：`RecipientId -> NodeId` 的确定性映射，
//!   支撑"增删一个节点只扰动 `1/(n±1)` 份额"的最小扰动性质（R2）。
//! - 环本身是纯数据结构，不做任何 I/O；发布、版本比较等动作由
//!   `mesh-control::publisher` 与 `mesh-socket` 消费。
//!
//! ## 架构定位（Where）
//! - 与教师仓库的 `cluster::topology` 同属"集群拓扑"范畴，但教师仓库止步于
//!   世代/修订号的抽象契约，未给出具体的分片算法；环的选择算法在本仓库内
//!   原创自 §4.1 给出的 HRW 规则，托管在 [`hrw`] 子模块中。
//!
//! ## 并发模型（How）
//! - `Ring` 本身 `Clone`（内部以 `Arc` 共享节点表），Socket Node 端用
//!   `arc_swap::ArcSwap<Ring>` 持有当前快照并做无锁原子替换（§5 "共享状态"）。

mod descriptor;
mod hrw;

pub use descriptor::{NodeDescriptor, NodeId, RingVersion};

use std::sync::Arc;

use crate::error::MeshError;

/// 环为空时的选择错误；对应 §4.1 "Edge cases"。
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("ring has no live nodes")]
pub struct ErrNoNodes;

/// 不可变的环快照。
///
/// # 契约（What）
/// - [`Ring::select`] 在非空环上是全函数：对任意 `RecipientId` 都返回确定的
///   `NodeId`；
/// - 两个快照之间的替换是原子的：消费者要么看到旧快照要么看到新快照，不会
///   看到半成品（本结构的 `Clone` 是浅拷贝共享 `Arc`，真正的原子替换发生在
///   持有者一侧，见 `mesh-socket::RingHandle`）。
#[derive(Clone, Debug)]
pub struct Ring {
    version: RingVersion,
    nodes: Arc<Vec<NodeDescriptor>>,
}

impl Ring {
    /// 用权重表与版本号构造新环。每次 `new` 调用都对应一次版本递增事件——
    /// 调用方负责传入正确的 `version`（通常是上一版本的 `next()`）。
    pub fn new(nodes: Vec<NodeDescriptor>, version: RingVersion) -> Self {
        let mut nodes = nodes;
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        Self {
            version,
            nodes: Arc::new(nodes),
        }
    }

    /// 构造一个没有任何节点的空环，通常作为 Socket Node 启动前的占位快照。
    pub fn empty() -> Self {
        Self {
            version: RingVersion::new(0),
            nodes: Arc::new(Vec::new()),
        }
    }

    /// 从控制主题收到的权重表重建一份环快照。
    ///
    /// `RingUpdate` 只携带 `node_id -> weight`，没有 `public_address`/
    /// `joined_at`——Socket Node 侧的路由只依赖 [`select`](Self::select)，
    /// 不需要这两个字段，因此这里用空占位值合成 [`NodeDescriptor`]。
    pub fn from_weights(weights: &std::collections::BTreeMap<NodeId, u32>, version: RingVersion) -> Self {
        let nodes = weights
            .iter()
            .map(|(node_id, weight)| NodeDescriptor {
                node_id: node_id.clone(),
                weight: *weight,
                public_address: String::new(),
                joined_at: std::time::SystemTime::UNIX_EPOCH,
            })
            .collect();
        Self::new(nodes, version)
    }

    pub fn version(&self) -> RingVersion {
        self.version
    }

    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// 按 §4.1 的加权 HRW 规则为 `recipient_id` 选出所有者节点。
    ///
    /// - **前置条件**：无；空环返回 [`ErrNoNodes`]。
    /// - **后置条件**：单节点环恒定返回该节点；并列分值按 NodeId 字典序打破。
    pub fn select(&self, recipient_id: &str) -> Result<&NodeId, ErrNoNodes> {
        self.nodes
            .iter()
            .map(|n| (hrw::weighted_score(recipient_id, n.node_id.as_str(), n.weight), n))
            .max_by(|(score_a, a), (score_b, b)| {
                score_a.cmp(score_b).then_with(|| b.node_id.cmp(&a.node_id))
            })
            .map(|(_, n)| &n.node_id)
            .ok_or(ErrNoNodes)
    }

    /// 与 [`select`](Self::select) 等价，但返回拥有所有权的 [`NodeId`]；
    /// 供需要跨 `await` 边界持有结果的调用点使用。
    pub fn select_owned(&self, recipient_id: &str) -> Result<NodeId, ErrNoNodes> {
        self.select(recipient_id).cloned()
    }

    pub fn weight_of(&self, node_id: &NodeId) -> Option<u32> {
        self.nodes
            .iter()
            .find(|n| &n.node_id == node_id)
            .map(|n| n.weight)
    }

    /// 计算 `self` 相对 `previous` 新增/移除的节点（拓扑差分）。
    ///
    /// 用于 C9 转发器判定"节点被移除"，以及 C7 的"拓扑变更必须发布"规则。
    pub fn diff(&self, previous: &Ring) -> TopologyDiff {
        let current: Vec<&NodeId> = self.nodes.iter().map(|n| &n.node_id).collect();
        let prior: Vec<&NodeId> = previous.nodes.iter().map(|n| &n.node_id).collect();

        let added = current
            .iter()
            .filter(|id| !prior.contains(id))
            .map(|id| (*id).clone())
            .collect();
        let removed = prior
            .iter()
            .filter(|id| !current.contains(id))
            .map(|id| (*id).clone())
            .collect();

        TopologyDiff { added, removed }
    }
}

impl From<ErrNoNodes> for MeshError {
    fn from(_: ErrNoNodes) -> Self {
        MeshError::invariant("ring.select", "ring has no live nodes")
    }
}

/// 两个环快照之间的拓扑差分结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyDiff {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

impl TopologyDiff {
    pub fn is_topology_change(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}
