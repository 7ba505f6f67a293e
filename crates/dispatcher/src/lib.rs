//! # Dispatcher
//!
//! 数据分发模块。
//!
//! 负责：
//! - 从注册表解析活跃 sink 及其投递适配器
//! - 轮询队列，把待投递记录 fan-out 到每个缺失标志位的 sink
//! - 投递成功后立即持久化标志位，失败留待下次轮询

pub mod distributor;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod sinks;

pub use contracts::{DeliveryAdapter, MetadataRecord};
pub use distributor::{Distributor, DistributorConfig, PollReport, MIN_POLL_INTERVAL};
pub use error::DispatcherError;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use registry::{
    full_mask_of, load_active_sinks, ActiveSink, AdapterFactory, KindTable, SinkAdapter,
    SinkRegistry,
};
pub use sinks::{CacheSink, HttpSink, LogSink};
