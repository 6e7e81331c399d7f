//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 汇总 §7 定义的五类错误（瞬时外部故障、不变式违反、容量、协议、致命错误），
//!   为日志、指标与自动化容错策略提供统一、可穷举的分类。
//! - 与教师仓库 `spark-core::error::CoreError` 一脉相承：稳定错误码 + 人类可读
//!   描述 + 结构化分类，但收敛为单层结构，省去 Impl/Domain/Core 三层转换——
//!   本网格没有跨语言桥接或多运行时需求，三层模型的收益不足以抵消样板代码。
//!
//! ## 契约说明（What）
//! - 所有变体均实现 `std::error::Error + Send + Sync + 'static`，可安全跨线程传播；
//! - [`MeshError::category`] 返回 [`ErrorCategory`]，驱动调用方的重试/丢弃/告警策略；
//! - `codes` 子模块给出稳定字符串码，供日志聚合与告警规则引用。

use std::time::Duration;

/// 网格统一错误域。
#[derive(thiserror::Error, Debug, Clone)]
pub enum MeshError {
    /// 日志发布、会话存储或指标源在预算时间内未完成。
    #[error("transient failure in `{operation}`: {detail}")]
    Transient {
        operation: &'static str,
        detail: String,
    },

    /// 收到的状态与不变式矛盾（例如版本回退、未知收件人）；忽略 + 告警，不致命。
    #[error("invariant violated in `{where_}`: {detail}")]
    InvariantViolation { where_: &'static str, detail: String },

    /// 容量类限制：队列已满、握手速率超限、续传缓冲区溢出。
    #[error("capacity exceeded: {kind} ({detail})")]
    Capacity { kind: CapacityKind, detail: String },

    /// 协议类错误：续传令牌签名不合法或已过期。
    #[error("protocol violation: {detail}")]
    Protocol { detail: String },

    /// 致命错误：无法订阅自有投递主题、缺失共享密钥、时钟严重漂移。进程应以非零码退出。
    #[error("fatal startup failure: {detail}")]
    Fatal { detail: String },
}

/// 容量类错误的具体来源，便于指标按 `reason` 维度打点。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityKind {
    /// 每连接出站队列已满，采取 drop-oldest。
    BufferFull,
    /// 握手速率超过 `handshake_rps`。
    HandshakeRateExceeded,
    /// 续传缓冲区超出 `buffer_capacity`。
    ReplayOverflow,
    /// 日志发布重试耗尽 `T_pub_max` 预算。
    PublishFailed,
}

impl CapacityKind {
    /// 稳定 reason 标签，用于 `drops{reason=...}` 风格的计数器。
    pub const fn reason(self) -> &'static str {
        match self {
            CapacityKind::BufferFull => "buffer_full",
            CapacityKind::HandshakeRateExceeded => "handshake_rate_exceeded",
            CapacityKind::ReplayOverflow => "replay_overflow",
            CapacityKind::PublishFailed => "publish_failed",
        }
    }
}

/// 错误分类，驱动重试、退避与告警策略。
///
/// # 设计背景（Why）
/// - 对齐 §7 的处置策略表：可重试错误携带退避建议；容量错误已在产生时记录具体
///   `CapacityKind`；致命错误要求调用方拒绝进入 `READY` 并以非零码退出。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Retryable(RetryAdvice),
    Ignore,
    Capacity,
    Reject,
    Fatal,
}

/// 退避建议，供重试循环读取。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAdvice {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryAdvice {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl MeshError {
    /// 归类当前错误，供调用方选择重试、丢弃或拒绝策略。
    pub fn category(&self) -> ErrorCategory {
        match self {
            MeshError::Transient { .. } => ErrorCategory::Retryable(RetryAdvice::default()),
            MeshError::InvariantViolation { .. } => ErrorCategory::Ignore,
            MeshError::Capacity { .. } => ErrorCategory::Capacity,
            MeshError::Protocol { .. } => ErrorCategory::Reject,
            MeshError::Fatal { .. } => ErrorCategory::Fatal,
        }
    }

    pub fn transient(operation: &'static str, detail: impl Into<String>) -> Self {
        MeshError::Transient {
            operation,
            detail: detail.into(),
        }
    }

    pub fn invariant(where_: &'static str, detail: impl Into<String>) -> Self {
        MeshError::InvariantViolation {
            where_,
            detail: detail.into(),
        }
    }

    pub fn capacity(kind: CapacityKind, detail: impl Into<String>) -> Self {
        MeshError::Capacity {
            kind,
            detail: detail.into(),
        }
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        MeshError::Protocol {
            detail: detail.into(),
        }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        MeshError::Fatal {
            detail: detail.into(),
        }
    }
}

/// 网格统一 `Result` 别名，默认错误类型为 [`MeshError`]。
pub type Result<T, E = MeshError> = std::result::Result<T, E>;
