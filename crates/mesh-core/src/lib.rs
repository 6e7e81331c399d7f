//! # mesh-core
//!
//! ## 定位与职责（Why）
//! - 作为消息分发网格（messaging fabric）的共享契约层：环（[`ring`]）、信封
//!   （[`envelope`]）、续传令牌（[`resume`]）、负载快照与扩缩容决策
//!   （[`load`]、[`scaling`]）、控制面广播消息（[`control`]）全部在此定义，
//!   使 Socket Node 与控制面可以在不互相依赖具体实现的前提下交换数据。
//! - 统一错误域 [`error::MeshError`] 与配置结构 [`config::MeshConfig`]，
//!   让各 crate 共享同一套稳定错误码与默认参数。
//!
//! ## 架构嵌入（Where）
//! - 本 crate 不持有任何 I/O：外部日志、会话存储、指标源均由 `mesh-store` /
//!   `mesh-socket` / `mesh-control` 以 trait 形式消费，`mesh-core` 只提供
//!   纯数据结构与纯函数算法（环选择、HMAC 校验、负载聚合）。
//!
//! ## Feature 策略（Trade-offs）
//! - 本 crate 面向标准库环境（消息网格天然需要 `tokio`/网络 I/O），不追求
//!   `no_std` 可移植性；这是相对教师仓库 `spark-core` 的一处简化，原因见
//!   仓库根目录 `DESIGN.md` 的"Open Question"记录。

pub mod config;
pub mod control;
pub mod envelope;
pub mod error;
pub mod load;
pub mod resume;
pub mod ring;
pub mod scaling;
pub mod time;

pub use error::{ErrorCategory, MeshError, Result};
pub use ring::{NodeDescriptor, NodeId, Ring, RingVersion};
