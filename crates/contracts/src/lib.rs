//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the fan-out engine.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Commit Model
//! - Every registered sink owns one bit of a `u64`
//! - A record is pending while `committed_mask & full_mask != full_mask`
//! - Bits are only ever added to a record, never cleared

mod blueprint;
mod error;
mod record;
mod sink;
mod store;

pub use blueprint::*;
pub use error::*;
pub use record::*;
pub use sink::*;
pub use store::*;
