//! # envelope 模块说明
//!
//! ## 意图（Why）
//! - §3 定义的 `Envelope` 是投递主题上唯一的线上格式；字段按字母序声明，
//!   配合 `serde_json` 按声明顺序序列化结构体的行为，得到"键看起来已排序"
//!   的规范化输出（§6 "canonically serialized; keys sorted"），不需要额外
//!   引入会重新排序 map 的中间表示。
//! - `MsgId` 去重窗口就是 ReplayBuffer 的生命周期（§3 "Lifecycle"）；本模块
//!   只负责"生成"与"比较"，去重状态本身由 `mesh-store` 的重放缓冲持有。
//!
//! ## 契约（What）
//! - [`Envelope`] 的 `Serialize`/`Deserialize` 互为逆操作（L1 往返律）。
//! - [`MsgIdGenerator`] 在单个 Socket Node 内生成跨会话唯一的 `MsgId`，无需
//!   额外的 uuid/rand 依赖——直接沿用教师仓库"节点本地单调计数器 + 节点标识"
//!   的唯一性构造手法（参见 `spark-core::runtime` 的请求 ID 分配方式）。

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::ring::NodeId;

/// 消息在重放窗口内的去重键。
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MsgId(pub String);

impl MsgId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MsgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 投递跳数：直接投递还是由 Forwarder 重新路由。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hop {
    Direct,
    Relay,
}

/// §3 的信封结构；字段按字母序声明，使 `serde_json` 的声明序序列化呈现出
/// "键已排序"的规范形态。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub from: String,
    pub hop: Hop,
    pub msg_id: MsgId,
    pub node_hint: Option<NodeId>,
    pub payload: Vec<u8>,
    pub to: String,
    pub ts: u64,
    #[serde(rename = "type")]
    pub type_: String,
}

impl Envelope {
    /// 构造一个尚未打上时间戳/MsgId 的出站信封；Socket Node 在 `Send` 路径上
    /// 补全二者（§4.4："the node is the authoritative timestamper"）。
    pub fn outbound(from: impl Into<String>, to: impl Into<String>, type_: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            from: from.into(),
            hop: Hop::Direct,
            msg_id: MsgId::new(""),
            node_hint: None,
            payload,
            to: to.into(),
            ts: 0,
            type_: type_.into(),
        }
    }

    pub fn with_msg_id(mut self, msg_id: MsgId) -> Self {
        self.msg_id = msg_id;
        self
    }

    pub fn with_ts(mut self, ts: u64) -> Self {
        self.ts = ts;
        self
    }

    pub fn as_relay(mut self, hint: NodeId) -> Self {
        self.hop = Hop::Relay;
        self.node_hint = Some(hint);
        self
    }
}

/// 单节点内的单调 `MsgId` 生成器：`{node_id}-{counter}`。
///
/// 跨节点唯一性不是本生成器的职责——每条信封的生产者只能是一个 Socket Node，
/// 节点标识天然区分不同生产者。
#[derive(Debug)]
pub struct MsgIdGenerator {
    node_id: NodeId,
    counter: AtomicU64,
}

impl MsgIdGenerator {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> MsgId {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        MsgId::new(format!("{}-{seq}", self.node_id))
    }
}
