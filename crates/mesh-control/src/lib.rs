//! # mesh-control
//!
//! ## 定位与职责（Why）
//! - 承载 §4.5-§4.9 描述的负载均衡控制面：租约选举（C5）、指标聚合（C6）、
//!   扩缩容决策（C7）、环发布（C8）、节点移除后的转发（C9）。这五个组件
//!   通过一份共享的 `Arc<ArcSwap<Ring>>` 与彼此及控制主题耦合,呼应 §9
//!   "Cyclic component references (LB ↔ socket nodes) → broken by the
//!   control topic"：本 crate 从不直接调用 Socket Node,只向控制主题发布。
//! - 教师仓库的宿主装配（`HostBuilder`/`ServiceRegistry`/`MiddlewareRegistry`/
//!   `GracefulShutdownCoordinator`）是一套通用依赖注入脚手架,服务于"任意
//!   Spark 中间件管线"这一更宽泛的问题；本网格的控制面组件职责固定、数量
//!   少、且彼此间的协作关系是树状（C7 驱动 C8/C9,C5 只被 C7/C8 查询）而非
//!   开放式的服务图,通用注册表模式的抽象成本压不过直接持有具体字段的
//!   简单性,因此没有移植——详见仓库根 `DESIGN.md` 的裁剪记录。
//!
//! ## 架构嵌入（Where）
//! - [`election`] 维护单写者租约与 `isLeader` 标志；
//! - [`aggregator`] 拉取并陈旧退场每节点的 `LoadSnapshot`；
//! - [`scaling_controller`] 领导者专属,驱动紧迫度/扩容/缩容/权重/收敛
//!   决策并更新共享环快照；
//! - [`publisher`] 把决策序列化发布到控制主题,并驱动编排器 API；
//! - [`forwarder`] 节点被移除后接手它的投递主题,直到转发窗口或滞后静默
//!   结束。

pub mod aggregator;
pub mod election;
pub mod forwarder;
pub mod publisher;
pub mod scaling_controller;

pub use aggregator::MetricsAggregator;
pub use election::LeaderElection;
pub use publisher::{NoopOrchestrator, RingPublisher, ScaleOrchestrator};
pub use scaling_controller::ScalingController;
