//! # drain 模块说明（下线状态机的纯调度部分）
//!
//! ## 意图（Why）
//! - §4.4 "State machine of a socket node"：`READY → DRAINING` 之后按
//!   `B`/`T_drain_step` 的节奏批量断开,到 `T_drain_max` 硬截止或会话清空
//!   为止。把"选出这一批要断开谁"与"何时该停止"拆成纯函数,方便在不跑真实
//!   定时器的情况下对调度逻辑做单元测试。

/// 从候选收件人列表中选出本轮要断开的一批,最多 `batch` 个。
pub fn select_drain_batch(candidates: &[String], batch: usize) -> Vec<String> {
    candidates.iter().take(batch).cloned().collect()
}

/// 判断下线调度是否应当停止：要么没有会话剩余,要么硬截止已到。
pub fn should_stop_draining(remaining_sessions: usize, elapsed_ms: u64, drain_deadline_ms: u64) -> bool {
    remaining_sessions == 0 || elapsed_ms >= drain_deadline_ms
}
