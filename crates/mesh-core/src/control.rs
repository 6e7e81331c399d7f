//! # control 模块说明
//!
//! ## 意图（Why）
//! - §6 "Control topic messages" 要求的三种消息在整个节点群中必须位级兼容；
//!   用普通的 `serde`-派生结构体表达，不掺杂任何实现细节的字段，保证所有
//!   Socket Node 与控制面进程用同一套类型编解码。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ring::NodeId;

/// 新环快照在控制主题上的广播形式。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RingUpdate {
    pub version: u64,
    pub weights: BTreeMap<NodeId, u32>,
    pub reason: String,
    pub ts: u64,
}

/// 下线指令：要求目标节点进入 DRAINING。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainDirective {
    pub node_id: NodeId,
    pub deadline: u64,
    pub reason: String,
}

/// 扩缩容动作的广播信号,供观测与审计使用（实际扩缩容通过编排器 API 完成）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleAction {
    Out,
    In,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleSignal {
    pub action: ScaleAction,
    pub from_n: i64,
    pub to_n: i64,
    pub reason: String,
    pub ts: u64,
}

/// 控制主题上可能出现的三种消息的统一信封,便于一个消费者循环里做单次
/// 反序列化后的模式匹配分发。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlMessage {
    RingUpdate(RingUpdate),
    DrainDirective(DrainDirective),
    ScaleSignal(ScaleSignal),
}
