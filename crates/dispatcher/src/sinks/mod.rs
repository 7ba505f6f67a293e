//! Delivery adapter implementations
//!
//! Contains CacheSink, HttpSink, and LogSink.

mod cache;
mod http;
mod log;

pub use self::cache::{CacheSink, CacheSinkConfig};
pub use self::http::{HttpSink, HttpSinkConfig};
pub use self::log::{LogSink, LogSinkConfig};
