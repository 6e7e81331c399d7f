//! # mesh-socket
//!
//! ## 定位与职责（Why）
//! - 承载 §4.4 描述的 Socket Node：客户端接入点，负责 `Attach`/`Send`/`Close`
//!   三个对外动作、own-topic 与 control-topic 的后台消费、以及
//!   `STARTING → READY → DRAINING → STOPPED` 的生命周期状态机。
//! - 沿用教师仓库 `spark-switch` 把"路由表 + 会话表 + 后台任务"绑定在一个
//!   顶层结构体、以 `Arc<Self>` 跨任务共享的组织方式；信令协议细节
//!   （SIP/SDP 注册、邀请、媒体协商）不在本网格的范围内，被替换为一个
//!   不关心消息内容的通用信封路由器。
//!
//! ## 架构嵌入（Where）
//! - [`ring_handle`] 持有本地 Ring 快照的无锁原子句柄；
//! - [`session_table`]/[`session`] 管理收件人到本地连接状态的映射；
//! - [`outbound_queue`] 是每会话有界、drop-oldest 的出站缓冲；
//! - [`rate_limiter`] 是接入握手的漏桶限流器；
//! - [`drain`] 把下线调度的批量选取与停止条件拆成纯函数,便于单测；
//! - [`publish_retry`] 封装对 `mesh-store::MessageLog` 的指数退避发布；
//! - [`metrics`] 收集 §7 要求的丢弃类计数器；
//! - [`node`] 把以上全部组装成 [`node::SocketNode`]。

pub mod drain;
pub mod metrics;
pub mod node;
pub mod outbound_queue;
pub mod publish_retry;
pub mod rate_limiter;
pub mod ring_handle;
pub mod session;
pub mod session_table;

pub use metrics::{NodeMetrics, NodeMetricsSnapshot};
pub use node::{CloseOutcome, Lifecycle, SocketNode};
pub use outbound_queue::OutboundQueue;
pub use rate_limiter::HandshakeRateLimiter;
pub use ring_handle::RingHandle;
pub use session::{Session, SessionHandle, SharedSession};
pub use session_table::SessionTable;
