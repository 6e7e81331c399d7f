//! # configuration 模块说明
//!
//! ## 意图（Why）
//! - 教师仓库在 `configuration` 模块里做了一整套可热更新、带元数据的配置值
//!   抽象（`ConfigValue`/`ConfigMetadata`/`ConfigurationBuilder`）；本网格的
//!   配置项是 §6 中列举的一组封闭、静态的调参旋钮,没有热更新或多源合并的
//!   需求，因此收敛为一个普通的 `MeshConfig` 结构体，字段即契约，默认值对齐
//!   §6 给出的数值。
//! - 仍然保留显式的校验步骤（[`MeshConfig::validate`]），呼应教师仓库"配置
//!   错误属于启动期致命错误"的处理方式（参见 `mesh-core::error::MeshError::Fatal`）。
//!
//! ## 契约（What）
//! - 所有字段均为 `pub`，调用方可以直接构造字面量或从 TOML/环境变量解析后
//!   填充；[`MeshConfig::default`] 给出 §6 的默认值表。

use std::time::Duration;

use crate::error::MeshError;

/// 网格运行参数，字段命名与 §6 配置表一一对应。
#[derive(Debug, Clone, PartialEq)]
pub struct MeshConfig {
    /// 节点权重下限，§4.1/§4.7。
    pub min_weight: u32,
    /// 单次扩容周期允许的最大增量 `K_max`，§4.7。
    pub max_scale_out_step: u32,
    /// 判断"加速扩容"的回看窗口 `T_window`。
    pub scale_out_window: Duration,
    /// 扩缩容决策节奏 `T_decide`。
    pub decide_interval: Duration,
    /// 指标聚合节奏 `T_agg`。
    pub aggregate_interval: Duration,
    /// 节点指标陈旧阈值 `T_stale`，超过后节点被视为缺席。
    pub stale_after: Duration,
    /// 每收件人重放缓冲容量 `W`。
    pub buffer_capacity: usize,
    /// 重放缓冲 TTL `T_buf`。
    pub buffer_ttl: Duration,
    /// 续传令牌有效期 `T_tok`。
    pub token_ttl: Duration,
    /// 每连接出站队列容量。
    pub per_conn_queue: usize,
    /// 握手速率上限（次/秒）。
    pub handshake_rps: u32,
    /// 优雅下线硬截止 `T_drain_max`。
    pub drain_deadline: Duration,
    /// 下线调度的 tick 间隔 `T_drain_step`。
    pub drain_step: Duration,
    /// 每个 tick 断开的收件人批量大小 `B`。
    pub drain_batch: usize,
    /// 转发器最长运行时间 `T_forward`。
    pub forward_horizon: Duration,
    /// 转发器静默退出阈值 `T_quiet`。
    pub forward_quiet: Duration,
    /// 租约时长。
    pub lease_dur: Duration,
    /// 租约续租间隔。
    pub lease_renew: Duration,
    /// 缩容后允许的最小节点数 `n_min`。
    pub n_min: usize,
    /// 集群允许的最大节点数 `n_max`。
    pub n_max: usize,
    /// 单次发布失败重试预算 `T_pub_max`。
    pub publish_retry_budget: Duration,
    /// 心跳节奏 `T_hb`；spec 在 §4.4 step 4 引用但未在 §6 给出默认值——
    /// 与指标聚合节奏对齐是本仓库的选择（记录见仓库根 `DESIGN.md`）。
    pub heartbeat_interval: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            min_weight: 10,
            max_scale_out_step: 5,
            scale_out_window: Duration::from_secs(5 * 60),
            decide_interval: Duration::from_secs(15),
            aggregate_interval: Duration::from_secs(5),
            stale_after: Duration::from_secs(30),
            buffer_capacity: 100,
            buffer_ttl: Duration::from_secs(3600),
            token_ttl: Duration::from_secs(3600),
            per_conn_queue: 256,
            handshake_rps: 100,
            drain_deadline: Duration::from_secs(300),
            drain_step: Duration::from_secs(1),
            drain_batch: 16,
            forward_horizon: Duration::from_secs(5 * 60),
            forward_quiet: Duration::from_secs(30),
            lease_dur: Duration::from_secs(15),
            lease_renew: Duration::from_secs(10),
            n_min: 2,
            n_max: 50,
            publish_retry_budget: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
        }
    }
}

impl MeshConfig {
    /// 校验配置是否内部自洽；失败时返回 [`MeshError::Fatal`]，调用方应拒绝
    /// 进入 `READY` 状态。
    ///
    /// - `min_weight` 必须 ≥ 1（§4.1：权重 0 被禁止）；
    /// - `lease_renew` 必须小于 `lease_dur`，否则续租会在租约过期后才尝试；
    /// - `n_min` 不能超过 `n_max`。
    pub fn validate(&self) -> Result<(), MeshError> {
        if self.min_weight == 0 {
            return Err(MeshError::fatal("min_weight must be >= 1"));
        }
        if self.lease_renew >= self.lease_dur {
            return Err(MeshError::fatal(
                "lease_renew must be strictly less than lease_dur",
            ));
        }
        if self.n_min > self.n_max {
            return Err(MeshError::fatal("n_min must not exceed n_max"));
        }
        if self.buffer_capacity == 0 {
            return Err(MeshError::fatal("buffer_capacity must be >= 1"));
        }
        Ok(())
    }
}
