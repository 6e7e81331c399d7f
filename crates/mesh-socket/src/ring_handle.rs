//! # ring_handle 模块说明
//!
//! ## 意图（Why）
//! - §5 "Shared state & mutation"：本地 Ring 快照是只读为主的共享状态，替换
//!   必须是单次原子指针替换,不能让读者看到半成品。`arc_swap::ArcSwap` 正是
//!   为这种读多写少场景设计的无锁容器,教师仓库在 `spark-core::runtime`、
//!   `spark-core::kernel`、传输层 TLS 相关代码中反复用它承载"热路径只读、
//!   偶尔替换"的配置/状态,这里原样借用同一模式。
//! - §4.1 "Versioning"：拒绝应用版本低于当前的更新,相等版本是空操作。

use arc_swap::ArcSwap;
use mesh_core::ring::{Ring, RingVersion};

/// 持有 Socket Node 本地 Ring 快照的句柄；可安全跨任务共享克隆。
#[derive(Clone)]
pub struct RingHandle {
    inner: std::sync::Arc<ArcSwap<Ring>>,
}

impl RingHandle {
    pub fn new(initial: Ring) -> Self {
        Self {
            inner: std::sync::Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// 读取当前快照;调用方可长期持有返回值,不阻塞后续替换。
    pub fn load(&self) -> std::sync::Arc<Ring> {
        self.inner.load_full()
    }

    /// 尝试应用新快照；版本严格小于当前版本时拒绝,返回 `false`。
    /// 相等版本视为空操作（同样返回 `false`，因为没有发生实际替换）。
    pub fn apply(&self, new_ring: Ring) -> bool {
        let current = self.inner.load();
        if new_ring.version() <= current.version() {
            return false;
        }
        self.inner.store(std::sync::Arc::new(new_ring));
        true
    }

    pub fn version(&self) -> RingVersion {
        self.inner.load().version()
    }
}
