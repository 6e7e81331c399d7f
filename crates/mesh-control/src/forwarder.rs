//! # forwarder 模块说明（C9 — Forwarder）
//!
//! ## 意图（Why）
//! - §4.9：节点被从环上移除后,它的投递主题上可能还残留尚未消费的信封。
//!   Forwarder 是一个有界生命周期的消费者,用一个独立的消费组 id 重新消费
//!   被移除节点的投递主题,把每条信封按当前环重新路由到新主人的投递主题。
//! - 终止条件是"先到先得"：跑满 `T_forward`,或者滞后量归零并保持
//!   `T_quiet`。幂等性交给终点 Socket Node 的 MsgId 去重处理,本模块不做
//!   去重,只负责"重新发布"。

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use mesh_core::envelope::Envelope;
use mesh_core::ring::{NodeId, Ring};
use mesh_store::{delivery_topic_for, MessageLog};
use tokio::task::JoinHandle;

/// 为被移除的 `node_id` 启动一个有界生命周期的转发任务。
///
/// `ring` 是控制面持有的当前环快照（由 [`crate::scaling_controller::ScalingController`]
/// 在每个决策周期更新）；转发器只读取,不写入。
pub fn spawn(
    node_id: NodeId,
    ring: Arc<ArcSwap<Ring>>,
    log: Arc<dyn MessageLog>,
    forward_horizon: Duration,
    forward_quiet: Duration,
) -> JoinHandle<()> {
    tokio::spawn(run(node_id, ring, log, forward_horizon, forward_quiet))
}

async fn run(node_id: NodeId, ring: Arc<ArcSwap<Ring>>, log: Arc<dyn MessageLog>, forward_horizon: Duration, forward_quiet: Duration) {
    let topic = delivery_topic_for(node_id.as_str());
    let group_id = format!("forwarder.{node_id}");

    let mut rx = match log.subscribe(&topic, &group_id).await {
        Ok(rx) => rx,
        Err(err) => {
            tracing::warn!(%node_id, error = %err, "forwarder failed to subscribe to removed node's delivery topic");
            return;
        }
    };

    let deadline = tokio::time::sleep(forward_horizon);
    tokio::pin!(deadline);
    let quiet_poll = forward_quiet.min(Duration::from_millis(500)).max(Duration::from_millis(1));
    let mut quiet_ticker = tokio::time::interval(quiet_poll);
    let mut quiet_since: Option<tokio::time::Instant> = None;

    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::debug!(%node_id, "forwarder reached its T_forward horizon, stopping");
                break;
            }
            maybe_record = rx.recv() => {
                match maybe_record {
                    Some(handle) => {
                        quiet_since = None;
                        if let Ok(envelope) = serde_json::from_slice::<Envelope>(&handle.record.bytes) {
                            if let Ok(target) = ring.load().select_owned(&envelope.to) {
                                let target_topic = delivery_topic_for(target.as_str());
                                if let Err(err) = log.publish(&target_topic, &envelope.to, handle.record.bytes.clone()).await {
                                    tracing::warn!(%node_id, %target, error = %err, "forwarder republish failed");
                                }
                            }
                        }
                        handle.ack();
                    }
                    None => {
                        tracing::debug!(%node_id, "forwarder's source topic closed, stopping");
                        break;
                    }
                }
            }
            _ = quiet_ticker.tick() => {
                match log.list_group_lag(&group_id).await {
                    Ok(0) => {
                        let now = tokio::time::Instant::now();
                        match quiet_since {
                            Some(since) if now.duration_since(since) >= forward_quiet => {
                                tracing::debug!(%node_id, "forwarder lag quiet for T_quiet, stopping");
                                break;
                            }
                            Some(_) => {}
                            None => quiet_since = Some(now),
                        }
                    }
                    Ok(_) => quiet_since = None,
                    Err(err) => {
                        tracing::warn!(%node_id, error = %err, "forwarder lag check failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_core::envelope::MsgId;
    use mesh_core::ring::{NodeDescriptor, RingVersion};
    use mesh_store::InMemoryMessageLog;

    fn ring_with(nodes: &[(&str, u32)]) -> Arc<ArcSwap<Ring>> {
        let descriptors = nodes.iter().map(|(id, w)| NodeDescriptor::new(*id, *w, format!("{id}.local"))).collect();
        Arc::new(ArcSwap::new(Arc::new(Ring::new(descriptors, RingVersion::new(1)))))
    }

    fn envelope_bytes(to: &str, msg_id: &str) -> Vec<u8> {
        let env = Envelope::outbound("r-sender", to, "chat", vec![]).with_msg_id(MsgId::new(msg_id));
        serde_json::to_vec(&env).unwrap()
    }

    /// Scenario 4 — node removal reroute (§8): pending envelopes on the
    /// removed node's topic are republished to the recipient's new owner.
    #[tokio::test(start_paused = true)]
    async fn pending_envelopes_are_rerouted_to_new_owner() {
        let log = Arc::new(InMemoryMessageLog::new());
        // two envelopes already sitting on delivery(B) for r7, which now maps to C
        log.publish(&delivery_topic_for("B"), "r7", envelope_bytes("r7", "m1")).await.unwrap();
        log.publish(&delivery_topic_for("B"), "r7", envelope_bytes("r7", "m2")).await.unwrap();

        let ring = ring_with(&[("A", 100), ("C", 100)]);
        let mut target_rx = log.subscribe(&delivery_topic_for("C"), "socket-c").await.unwrap();

        let handle = spawn(NodeId::from("B"), ring, log.clone(), Duration::from_secs(300), Duration::from_secs(30));

        let first = target_rx.recv().await.unwrap();
        let second = target_rx.recv().await.unwrap();
        let ids: Vec<MsgId> = [first, second]
            .iter()
            .map(|h| serde_json::from_slice::<Envelope>(&h.record.bytes).unwrap().msg_id)
            .collect();
        assert_eq!(ids, vec![MsgId::new("m1"), MsgId::new("m2")]);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn forwarder_stops_after_quiet_window_with_zero_lag() {
        let log = Arc::new(InMemoryMessageLog::new());
        let ring = ring_with(&[("A", 100)]);
        let handle = spawn(NodeId::from("B"), ring, log, Duration::from_secs(300), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn forwarder_stops_at_forward_horizon_even_with_activity() {
        let log = Arc::new(InMemoryMessageLog::new());
        let ring = ring_with(&[("A", 100)]);
        let handle = spawn(NodeId::from("B"), ring, log, Duration::from_millis(100), Duration::from_secs(300));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.is_finished());
    }
}
