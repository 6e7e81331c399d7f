//! 加权交会哈希（Highest Random Weight / "骨架 HRW"）评分函数。
//!
//! # 设计背景（Why）
//! - §4.1 要求 O(n) 选择、O(1) 每节点内存，且增删节点只扰动 `1/(n±1)` 比例的
//!   收件人；不引入虚拟节点表的一致性哈希环正是为此而生。
//! - 评分必须在所有进程间确定性一致，因此不能使用 `std::hash::RandomState`
//!   （每进程随机化）。改用 `sha2::Sha256` 摘要的前 8 字节作为评分基数，
//!   与教师仓库在 `spark-core` 中复用 `sha2` 做稳定摘要的做法一致。
//!
//! # 契约（What）
//! - `score(recipient, node)` 对相同输入始终返回相同的 `u64`；
//! - `weighted_score` 将基础分乘以权重（使用 `u128` 避免溢出），分值越大
//!   越优先被选中；
//! - 并列打分以 NodeId 字典序打破平局，保证全局确定性。

use sha2::{Digest, Sha256};

/// 计算 `recipient_id || node_id` 的基础哈希分，截断为 `u64`。
fn base_score(recipient_id: &str, node_id: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(recipient_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(node_id.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest >= 8 bytes"))
}

/// 加权评分：`h(recipient || node) * weight`。
///
/// 使用 `u128` 中间精度：`u64::MAX * u32::MAX` 不会溢出 `u128`，避免权重较大
/// 节点在评分阶段发生回绕而破坏选择的单调性。
pub(crate) fn weighted_score(recipient_id: &str, node_id: &str, weight: u32) -> u128 {
    (base_score(recipient_id, node_id) as u128) * (weight.max(1) as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_score_is_deterministic() {
        let a = base_score("alice", "node-1");
        let b = base_score("alice", "node-1");
        assert_eq!(a, b);
    }

    #[test]
    fn base_score_distinguishes_recipients() {
        let a = base_score("alice", "node-1");
        let b = base_score("bob", "node-1");
        assert_ne!(a, b);
    }

    #[test]
    fn higher_weight_yields_higher_or_equal_score() {
        let low = weighted_score("alice", "node-1", 1);
        let high = weighted_score("alice", "node-1", 100);
        assert!(high >= low);
    }
}
