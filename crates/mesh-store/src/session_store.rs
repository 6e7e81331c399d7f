//! # session_store 模块说明（C2 — Session Store 消费者契约）
//!
//! ## 意图（Why）
//! - §4.2 把会话存储定义为"外部 KV + 有界重放缓冲"，本仓库只需要消费契约，
//!   不关心具体后端（Redis、DynamoDB 等）。用 trait 表达契约，生产环境实现
//!   挂在 trait 对象后面；本 crate 额外提供一份内存实现供测试与本地开发。
//! - 内存实现的并发结构沿用教师仓库 `spark-switch::applications::LocationStore`
//!   的手法：用 `DashMap` 封装，避免上层直接触碰底层并发原语。

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use mesh_core::envelope::Envelope;
use mesh_core::error::MeshError;
use mesh_core::ring::NodeId;
use mesh_core::time::Clock;

/// 一次 `PutAttachment` 的结果：节点归属与单调递增的世代号。
///
/// 世代号是本仓库为落地 §4.2 "last-writer-wins + superseded 信号" 引入的
/// 具体机制——spec 只描述了行为，没有规定实现手段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentHandle {
    pub generation: u64,
}

/// Socket Node 对会话存储的消费契约（§4.2）。
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 以服务端过期时间登记 `recipient -> node_id` 归属，返回本次写入的世代号。
    async fn put_attachment(
        &self,
        recipient_id: &str,
        node_id: NodeId,
        ttl: Duration,
    ) -> Result<AttachmentHandle, MeshError>;

    /// 查询当前归属节点；过期或从未写入返回 `None`。
    async fn get_attachment(&self, recipient_id: &str) -> Result<Option<NodeId>, MeshError>;

    /// 条件删除：仅当当前归属确实是 `if_node_id` 时才删除；返回是否真正删除。
    async fn del_attachment(&self, recipient_id: &str, if_node_id: &NodeId) -> Result<bool, MeshError>;

    /// 检查给定的写入世代是否已被后来者取代（"superseded" 信号，§4.2）。
    async fn is_superseded(&self, recipient_id: &str, generation: u64) -> Result<bool, MeshError>;

    /// 追加一条信封到收件人的重放缓冲，容量 `cap`，超出容量丢弃最旧条目；
    /// 返回这条信封被分配到的 offset。
    async fn append_buffer(
        &self,
        recipient_id: &str,
        envelope: Envelope,
        cap: usize,
        ttl: Duration,
    ) -> Result<u64, MeshError>;

    /// 读取 `offset` 及之后（含）仍保留在缓冲区中的信封，按顺序返回。
    async fn read_buffer_from(&self, recipient_id: &str, offset: u64) -> Result<Vec<Envelope>, MeshError>;

    /// 下一条信封将被分配到的 offset；缓冲区从未写入时返回 `None`。
    async fn current_offset(&self, recipient_id: &str) -> Result<Option<u64>, MeshError>;
}

struct AttachmentEntry {
    node_id: NodeId,
    generation: u64,
    expires_at_ms: u64,
}

struct BufferEntry {
    next_offset: u64,
    entries: VecDeque<(u64, Envelope)>,
    last_activity_ms: u64,
    ttl_ms: u64,
}

/// 供单测与本地开发使用的内存版会话存储,不做跨进程共享。
pub struct InMemorySessionStore {
    clock: Arc<dyn Clock>,
    attachments: DashMap<String, AttachmentEntry>,
    buffers: DashMap<String, BufferEntry>,
    generation_seq: std::sync::atomic::AtomicU64,
}

impl InMemorySessionStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            attachments: DashMap::new(),
            buffers: DashMap::new(),
            generation_seq: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation_seq.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    fn evict_if_stale(&self, recipient_id: &str) {
        let now = self.clock.now_ms();
        if let Some(entry) = self.buffers.get(recipient_id) {
            if now.saturating_sub(entry.last_activity_ms) > entry.ttl_ms {
                drop(entry);
                self.buffers.remove(recipient_id);
            }
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put_attachment(
        &self,
        recipient_id: &str,
        node_id: NodeId,
        ttl: Duration,
    ) -> Result<AttachmentHandle, MeshError> {
        let generation = self.next_generation();
        let expires_at_ms = self.clock.now_ms() + ttl.as_millis() as u64;
        self.attachments.insert(
            recipient_id.to_string(),
            AttachmentEntry {
                node_id,
                generation,
                expires_at_ms,
            },
        );
        Ok(AttachmentHandle { generation })
    }

    async fn get_attachment(&self, recipient_id: &str) -> Result<Option<NodeId>, MeshError> {
        let now = self.clock.now_ms();
        match self.attachments.get(recipient_id) {
            Some(entry) if entry.expires_at_ms > now => Ok(Some(entry.node_id.clone())),
            Some(_) => {
                self.attachments.remove(recipient_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn del_attachment(&self, recipient_id: &str, if_node_id: &NodeId) -> Result<bool, MeshError> {
        let removed = self
            .attachments
            .remove_if(recipient_id, |_, entry| &entry.node_id == if_node_id);
        Ok(removed.is_some())
    }

    async fn is_superseded(&self, recipient_id: &str, generation: u64) -> Result<bool, MeshError> {
        match self.attachments.get(recipient_id) {
            Some(entry) => Ok(entry.generation != generation),
            None => Ok(true),
        }
    }

    async fn append_buffer(
        &self,
        recipient_id: &str,
        envelope: Envelope,
        cap: usize,
        ttl: Duration,
    ) -> Result<u64, MeshError> {
        self.evict_if_stale(recipient_id);
        let now = self.clock.now_ms();
        let mut entry = self.buffers.entry(recipient_id.to_string()).or_insert_with(|| BufferEntry {
            next_offset: 0,
            entries: VecDeque::new(),
            last_activity_ms: now,
            ttl_ms: ttl.as_millis() as u64,
        });

        let offset = entry.next_offset;
        entry.entries.push_back((offset, envelope));
        entry.next_offset += 1;
        entry.last_activity_ms = now;
        entry.ttl_ms = ttl.as_millis() as u64;

        while entry.entries.len() > cap {
            entry.entries.pop_front();
        }

        Ok(offset)
    }

    async fn read_buffer_from(&self, recipient_id: &str, offset: u64) -> Result<Vec<Envelope>, MeshError> {
        self.evict_if_stale(recipient_id);
        match self.buffers.get(recipient_id) {
            Some(entry) => Ok(entry
                .entries
                .iter()
                .filter(|(o, _)| *o >= offset)
                .map(|(_, env)| env.clone())
                .collect()),
            None => Ok(Vec::new()),
        }
    }

    async fn current_offset(&self, recipient_id: &str) -> Result<Option<u64>, MeshError> {
        self.evict_if_stale(recipient_id);
        Ok(self.buffers.get(recipient_id).map(|e| e.next_offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::time::FixedClock;

    fn store() -> InMemorySessionStore {
        InMemorySessionStore::new(Arc::new(FixedClock::new(0)))
    }

    fn env(msg_id: &str) -> Envelope {
        Envelope::outbound("x", "r5", "chat", vec![]).with_msg_id(mesh_core::envelope::MsgId::new(msg_id))
    }

    #[tokio::test]
    async fn attach_then_lookup_round_trips() {
        let store = store();
        store
            .put_attachment("r1", NodeId::from("a"), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(store.get_attachment("r1").await.unwrap(), Some(NodeId::from("a")));
    }

    #[tokio::test]
    async fn conditional_delete_only_matches_current_owner() {
        let store = store();
        store
            .put_attachment("r1", NodeId::from("a"), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(!store.del_attachment("r1", &NodeId::from("b")).await.unwrap());
        assert!(store.del_attachment("r1", &NodeId::from("a")).await.unwrap());
        assert_eq!(store.get_attachment("r1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn later_writer_supersedes_earlier_handle() {
        let store = store();
        let first = store
            .put_attachment("r1", NodeId::from("a"), Duration::from_secs(30))
            .await
            .unwrap();
        let _second = store
            .put_attachment("r1", NodeId::from("b"), Duration::from_secs(30))
            .await
            .unwrap();
        assert!(store.is_superseded("r1", first.generation).await.unwrap());
    }

    #[tokio::test]
    async fn append_buffer_trims_to_capacity_dropping_oldest() {
        let store = store();
        for id in ["m3", "m4", "m5", "m6"] {
            store
                .append_buffer("r5", env(id), 3, Duration::from_secs(3600))
                .await
                .unwrap();
        }
        let all = store.read_buffer_from("r5", 0).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|e| e.msg_id.as_str()).collect();
        assert_eq!(ids, vec!["m4", "m5", "m6"]);
    }

    /// L2 — resuming from `o < k` yields exactly `o..k` in order.
    #[tokio::test]
    async fn read_from_offset_yields_remaining_entries_in_order() {
        let store = store();
        for id in ["m1", "m2", "m3", "m4"] {
            store
                .append_buffer("r5", env(id), 100, Duration::from_secs(3600))
                .await
                .unwrap();
        }
        let resumed = store.read_buffer_from("r5", 2).await.unwrap();
        let ids: Vec<&str> = resumed.iter().map(|e| e.msg_id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn requesting_an_evicted_offset_returns_whatever_remains() {
        let store = store();
        for id in ["m1", "m2", "m3", "m4"] {
            store
                .append_buffer("r5", env(id), 2, Duration::from_secs(3600))
                .await
                .unwrap();
        }
        // offset 0 was evicted; asking for it returns everything still retained.
        let resumed = store.read_buffer_from("r5", 0).await.unwrap();
        let ids: Vec<&str> = resumed.iter().map(|e| e.msg_id.as_str()).collect();
        assert_eq!(ids, vec!["m3", "m4"]);
    }

    #[tokio::test]
    async fn current_offset_reflects_next_assignment() {
        let store = store();
        assert_eq!(store.current_offset("r5").await.unwrap(), None);
        store
            .append_buffer("r5", env("m1"), 100, Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(store.current_offset("r5").await.unwrap(), Some(1));
    }
}
