//! # node 模块说明（C4 — Socket Node）
//!
//! ## 意图（Why）
//! - 把本 crate 其余模块（环句柄、会话表、限流器、出站队列、下线调度的纯函数）
//!   组装成 §4.4 描述的单个节点运行时：`Attach`/`Send`/`Close` 三个对外动作，
//!   加上own-topic 消费、控制主题消费、心跳三个后台任务，以及
//!   `STARTING → READY → DRAINING → STOPPED` 的生命周期状态机。
//! - 组装方式参照教师仓库 `spark-switch` 把"路由表 + 会话表 + 若干后台任务"
//!   绑定在一个顶层结构体上、用 `Arc<Self>` 在任务间共享的手法。
//!
//! ## 架构定位（Where）
//! - 依赖 `mesh-store` 的三个外部契约（`SessionStore`/`MessageLog`/
//!   `MetricsSource`）与 `mesh-core` 的纯数据/算法类型；自身不引入新的外部
//!   依赖。

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use mesh_core::config::MeshConfig;
use mesh_core::control::ControlMessage;
use mesh_core::envelope::{Envelope, MsgIdGenerator};
use mesh_core::error::{CapacityKind, MeshError};
use mesh_core::load::LoadSnapshot;
use mesh_core::resume::ResumeToken;
use mesh_core::ring::{NodeId, Ring, RingVersion};
use mesh_core::time::Clock;
use mesh_store::{MessageLog, MetricsSource, SessionStore};

use crate::drain;
use crate::publish_retry::publish_with_retry;
use crate::rate_limiter::HandshakeRateLimiter;
use crate::ring_handle::RingHandle;
use crate::session::SessionHandle;
use crate::session_table::SessionTable;
use crate::NodeMetrics;

/// Socket Node 的生命周期阶段（§4.4 "State machine"）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    Ready,
    Draining,
    Stopped,
}

impl Lifecycle {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Lifecycle::Starting,
            1 => Lifecycle::Ready,
            2 => Lifecycle::Draining,
            _ => Lifecycle::Stopped,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Lifecycle::Starting => 0,
            Lifecycle::Ready => 1,
            Lifecycle::Draining => 2,
            Lifecycle::Stopped => 3,
        }
    }
}

/// `Close` 的结果：是否携带一个供客户端重连的续传令牌。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOutcome {
    pub reason: String,
    pub resume_token: Option<String>,
}

/// 一个运行中的 Socket Node 实例。
///
/// 总是以 `Arc<SocketNode>` 形式持有——后台任务需要跨 `tokio::spawn` 边界
/// 共享同一份状态。
pub struct SocketNode {
    node_id: NodeId,
    config: MeshConfig,
    clock: Arc<dyn Clock>,
    resume_secret: Vec<u8>,

    ring: RingHandle,
    sessions: SessionTable,
    rate_limiter: HandshakeRateLimiter,
    msg_ids: MsgIdGenerator,
    pub metrics: NodeMetrics,

    log: Arc<dyn MessageLog>,
    store: Arc<dyn SessionStore>,
    metrics_sink: Arc<dyn MetricsSource>,

    lifecycle: AtomicU8,
    drain_started_at_ms: AtomicU64,
}

impl SocketNode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: NodeId,
        config: MeshConfig,
        clock: Arc<dyn Clock>,
        resume_secret: Vec<u8>,
        initial_ring: Ring,
        log: Arc<dyn MessageLog>,
        store: Arc<dyn SessionStore>,
        metrics_sink: Arc<dyn MetricsSource>,
    ) -> Arc<Self> {
        let rate_limiter = HandshakeRateLimiter::new(config.handshake_rps, clock.clone());
        let msg_ids = MsgIdGenerator::new(node_id.clone());
        Arc::new(Self {
            node_id,
            config,
            clock,
            resume_secret,
            ring: RingHandle::new(initial_ring),
            sessions: SessionTable::new(),
            rate_limiter,
            msg_ids,
            metrics: NodeMetrics::default(),
            log,
            store,
            metrics_sink,
            lifecycle: AtomicU8::new(Lifecycle::Starting.as_u8()),
            drain_started_at_ms: AtomicU64::new(0),
        })
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    fn set_lifecycle(&self, phase: Lifecycle) {
        self.lifecycle.store(phase.as_u8(), Ordering::Release);
    }

    pub fn ring_handle(&self) -> &RingHandle {
        &self.ring
    }

    /// 启动后台任务并进入 `READY`（§4.4 "STARTING -> READY"）。
    ///
    /// - 创建自有投递主题；
    /// - 启动 own-topic / control-topic 消费循环与心跳循环；
    /// - 三者都失败则保持在 `STARTING`，调用方据此拒绝把本节点计入存活集合。
    pub async fn start(self: &Arc<Self>) -> Result<(), MeshError> {
        let own_topic = mesh_store::message_log::delivery_topic_for(self.node_id.as_str());
        self.log.create_topic(&own_topic, 1, 1).await?;
        self.log
            .create_topic(mesh_store::message_log::CONTROL_TOPIC, 1, 1)
            .await?;

        let own_rx = self
            .log
            .subscribe(&own_topic, &format!("node-{}", self.node_id))
            .await?;
        let control_rx = self
            .log
            .subscribe(mesh_store::message_log::CONTROL_TOPIC, &format!("node-{}-control", self.node_id))
            .await?;

        let own_node = self.clone();
        tokio::spawn(async move { own_node.run_own_topic_loop(own_rx).await });

        let control_node = self.clone();
        tokio::spawn(async move { control_node.run_control_topic_loop(control_rx).await });

        let hb_node = self.clone();
        tokio::spawn(async move { hb_node.run_heartbeat_loop().await });

        self.set_lifecycle(Lifecycle::Ready);
        Ok(())
    }

    async fn run_own_topic_loop(self: Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<mesh_store::RecordHandle>) {
        while let Some(handle) = rx.recv().await {
            if self.lifecycle() == Lifecycle::Stopped {
                break;
            }
            self.handle_inbound_record(&handle).await;
            handle.ack();
        }
    }

    async fn handle_inbound_record(&self, handle: &mesh_store::RecordHandle) {
        let envelope: Envelope = match serde_json::from_slice(&handle.record.bytes) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.metrics.bump_invariant();
                tracing::warn!(error = %err, "dropping malformed envelope from own-topic");
                return;
            }
        };

        if let Some(session) = self.sessions.get_by_recipient(&envelope.to) {
            if session.outbound.push(envelope) {
                self.metrics.bump_buffer_full();
            }
            return;
        }

        if let Err(err) = self
            .store
            .append_buffer(
                &envelope.to.clone(),
                envelope,
                self.config.buffer_capacity,
                self.config.buffer_ttl,
            )
            .await
        {
            tracing::warn!(error = %err, "failed to append to replay buffer for unattached recipient");
        }
    }

    async fn run_control_topic_loop(self: Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<mesh_store::RecordHandle>) {
        while let Some(handle) = rx.recv().await {
            if self.lifecycle() == Lifecycle::Stopped {
                break;
            }
            self.handle_control_message(&handle).await;
            handle.ack();
        }
    }

    async fn handle_control_message(self: &Arc<Self>, handle: &mesh_store::RecordHandle) {
        let message: ControlMessage = match serde_json::from_slice(&handle.record.bytes) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed control message");
                return;
            }
        };

        match message {
            ControlMessage::RingUpdate(update) => {
                let ring = Ring::from_weights(&update.weights, RingVersion::new(update.version));
                if self.ring.apply(ring) {
                    tracing::info!(version = update.version, reason = %update.reason, "applied ring update");
                }
            }
            ControlMessage::DrainDirective(directive) => {
                if directive.node_id == self.node_id {
                    self.enter_drain();
                }
            }
            ControlMessage::ScaleSignal(signal) => {
                tracing::debug!(
                    action = ?signal.action,
                    from = signal.from_n,
                    to = signal.to_n,
                    "observed scale signal"
                );
            }
        }
    }

    async fn run_heartbeat_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        loop {
            ticker.tick().await;
            if self.lifecycle() == Lifecycle::Stopped {
                break;
            }
            let snapshot = self.local_load_snapshot();
            if let Err(err) = self.metrics_sink.push(self.node_id.clone(), snapshot).await {
                tracing::warn!(error = %err, "heartbeat push failed");
            }
        }
    }

    /// 本节点自身负载读数的占位实现：真实的 CPU/内存采样不在本仓库范围内
    /// （§1 把具体指标源排除在外），这里只给出连接数这类可以直接从运行时
    /// 状态得到的字段，其余字段留给真实指标管线覆盖。
    fn local_load_snapshot(&self) -> LoadSnapshot {
        let mut snapshot = LoadSnapshot::neutral(self.clock.now_ms());
        snapshot.active_conn = self.sessions.len() as u64;
        snapshot
    }

    fn enter_drain(self: &Arc<Self>) {
        if self.lifecycle() != Lifecycle::Ready {
            return;
        }
        self.set_lifecycle(Lifecycle::Draining);
        self.drain_started_at_ms.store(self.clock.now_ms(), Ordering::SeqCst);
        let node = self.clone();
        tokio::spawn(async move { node.run_drain_loop().await });
    }

    async fn run_drain_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.drain_step);
        loop {
            ticker.tick().await;
            let started = self.drain_started_at_ms.load(Ordering::SeqCst);
            let elapsed = self.clock.now_ms().saturating_sub(started);
            let candidates = self.sessions.snapshot_recipients();

            if drain::should_stop_draining(candidates.len(), elapsed, self.config.drain_deadline.as_millis() as u64) {
                self.set_lifecycle(Lifecycle::Stopped);
                break;
            }

            let batch = drain::select_drain_batch(&candidates, self.config.drain_batch);
            for recipient_id in batch {
                let Some(session) = self.sessions.get_by_recipient(&recipient_id) else {
                    continue;
                };
                if session.is_marked_for_drain() {
                    continue;
                }
                session.mark_for_drain();
                let _ = self.close(session.handle).await;
            }
        }
    }

    /// 为 `recipient_id` 建立一条本地会话。
    ///
    /// 续传令牌若存在但校验失败（签名不合法或超出 `T_tok`），整个 `Attach`
    /// 被拒绝（§7 "invalid ResumeToken ... reject the attach, let the client
    /// reconnect with an empty token, which always succeeds"）；不带令牌的
    /// `Attach` 在握手限流允许的前提下恒定成功，重放缓冲从零开始。
    pub async fn attach(
        self: &Arc<Self>,
        recipient_id: &str,
        resume_token: Option<&str>,
    ) -> Result<(SessionHandle, Vec<Envelope>), MeshError> {
        if self.lifecycle() != Lifecycle::Ready {
            return Err(MeshError::protocol("node is not accepting new attaches"));
        }

        if let Err(retry_after_ms) = self.rate_limiter.try_acquire() {
            self.metrics.bump_handshake_rate_exceeded();
            return Err(MeshError::capacity(
                CapacityKind::HandshakeRateExceeded,
                format!("retry after {retry_after_ms}ms"),
            ));
        }

        let now = self.clock.now_ms();

        let resume_from_offset = match resume_token {
            Some(wire) => {
                let parsed = ResumeToken::verify(
                    wire,
                    &self.resume_secret,
                    now,
                    self.config.token_ttl.as_millis() as u64,
                )?;
                if parsed.recipient_id != recipient_id {
                    return Err(MeshError::protocol("resume token recipient does not match attach target"));
                }
                Some(parsed.offset)
            }
            None => None,
        };

        let session = self.sessions.attach(recipient_id, self.config.per_conn_queue, now);
        self.store
            .put_attachment(recipient_id, self.node_id.clone(), self.config.buffer_ttl)
            .await?;

        let resumed = match resume_from_offset {
            Some(offset) => self.store.read_buffer_from(recipient_id, offset + 1).await?,
            None => Vec::new(),
        };

        Ok((session.handle, resumed))
    }

    /// 在 `handle` 对应的会话上发送一条信封（§4.4 "Routing on send"）。
    ///
    /// 节点是权威的时间戳/`MsgId` 分配者；路由结果恒定经由目标节点的投递
    /// 主题完成，即便目标恰好是本节点——own-topic 消费循环统一处理"本地是
    /// 否已接入"的判断，`Send` 本身不特判同节点投递。
    pub async fn send(self: &Arc<Self>, handle: SessionHandle, mut envelope: Envelope) -> Result<(), MeshError> {
        let session = self
            .sessions
            .get_by_handle(handle)
            .ok_or_else(|| MeshError::invariant("socket_node.send", "unknown or superseded session handle"))?;
        if session.is_closed() {
            return Err(MeshError::invariant("socket_node.send", "session already closed"));
        }

        envelope.ts = self.clock.now_ms();
        if envelope.msg_id.as_str().is_empty() {
            envelope.msg_id = self.msg_ids.next();
        }
        envelope.from = session.recipient_id.clone();

        let ring = self.ring.load();
        let target = ring.select_owned(&envelope.to).map_err(MeshError::from)?;

        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| MeshError::protocol(format!("envelope encode failed: {e}")))?;
        let topic = mesh_store::message_log::delivery_topic_for(target.as_str());

        // Publish failures exhausting the retry budget are dropped silently —
        // the sender is not notified (§4.4 "Failure semantics").
        if publish_with_retry(self.log.as_ref(), &topic, &envelope.to, bytes, self.config.publish_retry_budget)
            .await
            .is_err()
        {
            self.metrics.bump_publish_failed();
        }
        Ok(())
    }

    /// 撤销一个会话;若节点正在下线,附带一枚新鲜的续传令牌（§4.4 "Close"）。
    pub async fn close(self: &Arc<Self>, handle: SessionHandle) -> Result<CloseOutcome, MeshError> {
        let session = self
            .sessions
            .detach(handle)
            .ok_or_else(|| MeshError::invariant("socket_node.close", "unknown or already-closed session handle"))?;
        session.outbound.drain_discard();
        self.store
            .del_attachment(&session.recipient_id, &self.node_id)
            .await?;

        if self.lifecycle() == Lifecycle::Draining {
            let now = self.clock.now_ms();
            let offset = self.store.current_offset(&session.recipient_id).await?.unwrap_or(0);
            let token = ResumeToken::issue(session.recipient_id.clone(), offset, now, &self.resume_secret);
            Ok(CloseOutcome {
                reason: "drain".to_string(),
                resume_token: Some(token),
            })
        } else {
            Ok(CloseOutcome {
                reason: "client_closed".to_string(),
                resume_token: None,
            })
        }
    }
}
