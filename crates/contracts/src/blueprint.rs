//! FanoutBlueprint - Config Loader 输出
//!
//! 描述完整的运行配置：存储、分发循环、保留策略、Sink 注册种子。

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{ContractError, SinkDescriptor};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的运行配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FanoutBlueprint {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 存储设置
    #[serde(default)]
    #[validate(nested)]
    pub store: StoreConfig,

    /// 分发循环设置
    #[serde(default)]
    #[validate(nested)]
    pub distributor: DistributorConfig,

    /// 保留 / 压缩设置
    #[serde(default)]
    #[validate(nested)]
    pub retention: RetentionConfig,

    /// Sink 注册种子 (由 `sinks register` 写入注册表)
    #[serde(default)]
    #[validate(nested)]
    pub sinks: Vec<SinkSeed>,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StoreConfig {
    /// 数据库 URL (e.g., "sqlite://fanout.db", "sqlite::memory:")
    #[serde(default = "default_store_url")]
    #[validate(length(min = 1))]
    pub url: String,

    /// 连接池大小
    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_store_url() -> String {
    "sqlite://fanout.db".to_string()
}

fn default_max_connections() -> u32 {
    4
}

/// 分发循环配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DistributorConfig {
    /// 轮询间隔 (毫秒)
    #[serde(default = "default_poll_interval_ms")]
    #[validate(range(min = 1))]
    pub poll_interval_ms: u64,

    /// 单次投递超时 (毫秒)，超时视为普通投递失败
    #[serde(default = "default_delivery_timeout_ms")]
    #[validate(range(min = 1))]
    pub delivery_timeout_ms: u64,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_delivery_timeout_ms() -> u64 {
    5000
}

/// 保留策略配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RetentionConfig {
    /// 每个 key 达到该记录数后归档最旧的同等数量记录
    #[serde(default = "default_retention_threshold")]
    #[validate(range(min = 1))]
    pub threshold: usize,

    /// 压缩间隔 (毫秒)
    #[serde(default = "default_retention_interval_ms")]
    #[validate(range(min = 1))]
    pub interval_ms: u64,

    /// 归档资格策略
    #[serde(default)]
    pub policy: RetentionPolicy,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            threshold: default_retention_threshold(),
            interval_ms: default_retention_interval_ms(),
            policy: RetentionPolicy::default(),
        }
    }
}

/// Default per-key record count that triggers compaction
pub const DEFAULT_RETENTION_THRESHOLD: usize = 5;

fn default_retention_threshold() -> usize {
    DEFAULT_RETENTION_THRESHOLD
}

fn default_retention_interval_ms() -> u64 {
    60_000
}

/// 归档资格策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// 只看记录数与时间，不看 committed_mask (可能归档尚未投递完的记录)
    #[default]
    IgnoreCommitState,
    /// 仅归档已投递到所有活跃 sink 的记录
    RequireFullyDelivered,
}

/// Sink 注册种子
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkSeed {
    /// 唯一标识符
    #[validate(length(min = 1))]
    pub instance_id: String,

    /// 标志位 (必须是 2 的幂)
    pub bit: u64,

    /// Sink 类型标签 ("cache" / "http" / "log")
    pub kind: String,

    /// 类型特定配置
    #[serde(default = "default_sink_config")]
    pub config: serde_json::Value,
}

fn default_sink_config() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl SinkSeed {
    /// 转换为注册表描述符
    pub fn to_descriptor(&self) -> Result<SinkDescriptor, ContractError> {
        SinkDescriptor::new(&self.instance_id, self.bit, &self.kind, &self.config)
    }
}
