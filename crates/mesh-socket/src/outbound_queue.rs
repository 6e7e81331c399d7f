//! # outbound_queue 模块说明
//!
//! ## 意图（Why）
//! - §4.4 "per-connection backpressure"：每会话出站队列容量固定,满了就
//!   drop-oldest 并打点,而不是阻塞生产者或拒绝新消息——这与 `tokio::sync::mpsc`
//!   的"满了就让 send 等待/失败"语义相反,因此自行实现一个薄容器而非直接
//!   复用 `mpsc`。
//! - 单生产者（own-topic 消费者或客户端回显）/ 单消费者（该会话的写出任务），
//!   §5 "Shared state"对此有明确描述;内部仍用 `Mutex<VecDeque>` 而非手写无锁
//!   环形缓冲,因为队列深度小（默认 256）且不在每条消息的热路径上竞争。

use std::collections::VecDeque;
use std::sync::Mutex;

use mesh_core::envelope::Envelope;
use tokio::sync::Notify;

/// 有界出站队列,满时丢弃最旧元素。
pub struct OutboundQueue {
    capacity: usize,
    inner: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    dropped: std::sync::atomic::AtomicU64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
            dropped: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// 推入一条信封；若已满,丢弃队首最旧的一条并返回 `true` 表示发生了丢弃。
    pub fn push(&self, envelope: Envelope) -> bool {
        let mut dropped = false;
        {
            let mut guard = self.inner.lock().expect("outbound queue lock poisoned");
            if guard.len() >= self.capacity {
                guard.pop_front();
                dropped = true;
                self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            guard.push_back(envelope);
        }
        self.notify.notify_one();
        dropped
    }

    /// 等待直到队列非空,然后取走队首元素。
    pub async fn pop(&self) -> Envelope {
        loop {
            if let Some(env) = self.try_pop() {
                return env;
            }
            self.notify.notified().await;
        }
    }

    pub fn try_pop(&self) -> Option<Envelope> {
        self.inner.lock().expect("outbound queue lock poisoned").pop_front()
    }

    /// 丢弃并返回所有积压的信封;会话关闭时调用，对应 §5 "Session close ...
    /// the outbound queue is discarded"。
    pub fn drain_discard(&self) -> Vec<Envelope> {
        self.inner.lock().expect("outbound queue lock poisoned").drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("outbound queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}
