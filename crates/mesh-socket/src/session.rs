//! # session 模块说明
//!
//! ## 意图（Why）
//! - §4.4 契约里的 `SessionHandle` 是客户端后续 `Send`/`Close` 调用的凭据；
//!   本模块把"一个收件人当前在本节点上的活跃连接状态"聚在一个 `Session`里:
//!   出站队列、接入时间、是否已被下线调度选中。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::outbound_queue::OutboundQueue;

/// 单调递增的会话句柄标识,客户端持有它来引用一次 `Attach`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionHandle(pub u64);

/// 一个收件人在本节点上的活跃会话状态。
pub struct Session {
    pub handle: SessionHandle,
    pub recipient_id: String,
    pub outbound: OutboundQueue,
    pub attached_at_ms: u64,
    closed: AtomicBool,
    marked_for_drain: AtomicBool,
}

impl Session {
    pub fn new(handle: SessionHandle, recipient_id: String, queue_capacity: usize, attached_at_ms: u64) -> Self {
        Self {
            handle,
            recipient_id,
            outbound: OutboundQueue::new(queue_capacity),
            attached_at_ms,
            closed: AtomicBool::new(false),
            marked_for_drain: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn mark_for_drain(&self) {
        self.marked_for_drain.store(true, Ordering::Release);
    }

    pub fn is_marked_for_drain(&self) -> bool {
        self.marked_for_drain.load(Ordering::Acquire)
    }
}

/// 节点本地、单调递增的会话句柄生成器。
#[derive(Default)]
pub struct SessionHandleGenerator(AtomicU64);

impl SessionHandleGenerator {
    pub fn next(&self) -> SessionHandle {
        SessionHandle(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

pub type SharedSession = Arc<Session>;
