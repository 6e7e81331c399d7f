//! 节点标识与描述符。
//!
//! # 设计背景（Why）
//! - 参照教师仓库 `cluster::topology` 对集群世代（`ClusterEpoch`）的建模手法：
//!   用一个带显式语义的新类型包裹裸整数/字符串，避免节点 ID、版本号与普通
//!   字符串/整数混用导致的调用错误。

use std::sync::Arc;
use std::time::SystemTime;

/// 不透明的节点标识，生命周期内稳定、跨节点唯一。
///
/// 内部以 `Arc<str>` 存储：环快照、会话表、转发器都会频繁克隆 NodeId 作为
/// map key 或日志字段，`Arc<str>` 让这些克隆保持零拷贝。
#[derive(Clone, Debug, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for NodeId {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_ref() == other.0.as_ref()
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 环的单调递增版本号。
///
/// # 契约（What）
/// - `next()` 始终返回严格大于 `self` 的版本；
/// - Socket Node 侧以 `>=` 比较拒绝应用陈旧版本（§4.1 "Versioning"）。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RingVersion(pub u64);

impl RingVersion {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RingVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// 集群中一个存活 Socket Node 的描述。
#[derive(Clone, Debug, PartialEq)]
pub struct NodeDescriptor {
    pub node_id: NodeId,
    /// 相对权重，环选择算法用其加权打分；下限见 [`crate::config::MeshConfig::min_weight`]。
    pub weight: u32,
    pub public_address: String,
    pub joined_at: SystemTime,
}

impl NodeDescriptor {
    pub fn new(node_id: impl Into<NodeId>, weight: u32, public_address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            weight,
            public_address: public_address.into(),
            joined_at: SystemTime::now(),
        }
    }
}
