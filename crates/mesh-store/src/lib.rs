//! # mesh-store
//!
//! ## 定位与职责（Why）
//! - 把 §4.2（Session Store）与 §4.3（Message Log）两个"外部协作者"收敛为
//!   trait 契约，使 `mesh-socket` / `mesh-control` 只依赖接口,不依赖具体
//!   后端。随包提供的内存实现用于单测与本地开发,不是生产适配器。
//!
//! ## 架构嵌入（Where）
//! - 教师仓库没有直接对应的"外部 KV/日志适配层"模块；本 crate 的组织方式
//!   参照 `spark-switch::applications` 把"一个并发数据结构 + 一组方法"
//!   封装成独立模块的手法,并用 `async_trait` 表达异步契约边界，呼应
//!   §5 "Every I/O ... must be non-blocking with per-operation timeouts"。

pub mod lease_store;
pub mod message_log;
pub mod metrics_source;
pub mod session_store;

pub use lease_store::{InMemoryLeaseStore, LeaseOutcome, LeaseStore};
pub use message_log::{InMemoryMessageLog, MessageLog, Record, RecordHandle, CONTROL_TOPIC, delivery_topic_for};
pub use metrics_source::{InMemoryMetricsSource, MetricsSource};
pub use session_store::{AttachmentHandle, InMemorySessionStore, SessionStore};
