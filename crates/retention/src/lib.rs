//! # Retention
//!
//! 队列保留模块。
//!
//! 负责：
//! - 按 key 统计队列中的记录数
//! - 达到阈值时把最旧的记录复制到归档表并从队列删除
//! - 可选策略：只归档已投递到所有活跃 sink 的记录

pub mod compactor;
pub mod error;

pub use compactor::{CompactionReport, RetentionCompactor, MIN_INTERVAL};
pub use contracts::RetentionPolicy;
pub use error::RetentionError;
