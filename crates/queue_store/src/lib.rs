//! # Queue Store
//!
//! Durable publish queue and sink registry persistence.
//!
//! 负责：
//! - `SqliteStore`: 持久化队列、归档表、Sink 注册表 (sqlx)
//! - `MemoryStore`: 进程内实现，用于测试与嵌入
//! - `Producer`: 发布 API，在调用方的执行上下文中插入记录
//!
//! Both stores enforce the bit lifecycle invariant at registration time:
//! a bit can only be handed to a new sink when no active sink owns it and no
//! queued record still carries it.

mod clock;
mod memory;
mod producer;
mod sqlite;

pub use clock::MonotonicClock;
pub use contracts::{MetadataRecord, QueueStore, SinkDescriptor, SinkStore};
pub use memory::MemoryStore;
pub use producer::Producer;
pub use sqlite::SqliteStore;
