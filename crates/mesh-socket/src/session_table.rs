//! # session_table 模块说明
//!
//! ## 意图（Why）
//! - §5 "Session table (sessionId→handle) is guarded by a reader/writer lock
//!   or an equivalent lock-free map; writers are attach and detach only."
//!   直接沿用教师仓库 `spark-switch::core::SessionManager` 的构造手法：用
//!   `DashMap` 封装,对外只暴露 attach/detach/get 这几个动作,不泄露底层
//!   并发原语。与教师版本的关键差异是本表以 `RecipientId` 为主键
//!   （一个收件人在本节点上同时只应有一个活跃会话）,而不是以通话 ID 为键。

use std::sync::Arc;

use dashmap::DashMap;

use crate::session::{Session, SessionHandle, SessionHandleGenerator, SharedSession};

/// 节点本地的收件人 → 会话 映射表。
pub struct SessionTable {
    by_recipient: DashMap<String, SharedSession>,
    by_handle: DashMap<SessionHandle, String>,
    handles: SessionHandleGenerator,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            by_recipient: DashMap::new(),
            by_handle: DashMap::new(),
            handles: SessionHandleGenerator::default(),
        }
    }

    /// 为 `recipient_id` 建立一个新会话,替换之前可能存在的旧会话
    /// （last-writer-wins,§4.2 的归属语义在节点本地的自然延伸）。
    pub fn attach(&self, recipient_id: &str, queue_capacity: usize, now_ms: u64) -> SharedSession {
        let handle = self.handles.next();
        let session = Arc::new(Session::new(handle, recipient_id.to_string(), queue_capacity, now_ms));
        if let Some(old) = self.by_recipient.insert(recipient_id.to_string(), session.clone()) {
            old.mark_closed();
            self.by_handle.remove(&old.handle);
        }
        self.by_handle.insert(handle, recipient_id.to_string());
        session
    }

    pub fn get_by_recipient(&self, recipient_id: &str) -> Option<SharedSession> {
        self.by_recipient.get(recipient_id).map(|e| e.clone())
    }

    pub fn get_by_handle(&self, handle: SessionHandle) -> Option<SharedSession> {
        let recipient_id = self.by_handle.get(&handle)?.clone();
        self.get_by_recipient(&recipient_id)
    }

    /// 撤销一个会话;仅当它仍是该收件人当前的活跃会话时才真正移除
    /// （避免一个过期句柄的 `Close` 误伤后来者）。
    pub fn detach(&self, handle: SessionHandle) -> Option<SharedSession> {
        let recipient_id = self.by_handle.remove(&handle).map(|(_, r)| r)?;
        let removed = self
            .by_recipient
            .remove_if(&recipient_id, |_, session| session.handle == handle)
            .map(|(_, session)| session);
        if let Some(session) = &removed {
            session.mark_closed();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.by_recipient.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 所有当前活跃会话的快照（按到达顺序无关）,供下线调度批量选取收件人。
    pub fn snapshot_recipients(&self) -> Vec<String> {
        self.by_recipient.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_then_lookup_by_recipient_and_handle() {
        let table = SessionTable::new();
        let session = table.attach("r1", 16, 0);
        assert!(Arc::ptr_eq(&table.get_by_recipient("r1").unwrap(), &session));
        assert!(Arc::ptr_eq(&table.get_by_handle(session.handle).unwrap(), &session));
    }

    #[test]
    fn reattaching_same_recipient_closes_the_old_session() {
        let table = SessionTable::new();
        let first = table.attach("r1", 16, 0);
        let second = table.attach("r1", 16, 10);
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert!(table.get_by_handle(first.handle).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn detach_removes_only_the_matching_handle() {
        let table = SessionTable::new();
        let first = table.attach("r1", 16, 0);
        table.detach(first.handle);
        assert!(table.get_by_recipient("r1").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn detaching_a_superseded_handle_does_not_remove_the_new_session() {
        let table = SessionTable::new();
        let first = table.attach("r1", 16, 0);
        let _second = table.attach("r1", 16, 10);
        // first.handle was already evicted from by_handle on reattach; detaching
        // it is a no-op rather than removing the live second session.
        assert!(table.detach(first.handle).is_none());
        assert!(table.get_by_recipient("r1").is_some());
    }
}
