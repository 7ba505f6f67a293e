//! MetadataRecord - Producer output, Distributor input
//!
//! One row of the publish queue.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for deriving transaction ids.
const TRANSACTION_NAMESPACE: Uuid = Uuid::from_u128(0x5f1d_2c3a_8e47_4b0f_9a61_0c7e_3d52_b8a4);

/// Derive the transaction id of a record published under `key` at `created_at`.
///
/// Deterministic: the same `(created_at, key)` pair always yields the same id,
/// which lets callers detect a re-publication of an already queued update.
pub fn transaction_id(created_at: DateTime<Utc>, key: &str) -> String {
    let name = format!("{}:{}", created_at.timestamp_micros(), key);
    Uuid::new_v5(&TRANSACTION_NAMESPACE, name.as_bytes()).to_string()
}

/// A published key/value update plus its delivery state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Primary key, derived from `(created_at, key)`
    pub transaction_id: String,

    /// Logical name of what changed (e.g. "throttle.ips")
    pub key: String,

    /// Opaque serialized payload
    pub value: Bytes,

    /// Bit `b` is set iff the sink owning `b` has applied this record
    pub committed_mask: u64,

    /// Publication time; drives delivery and retention order
    pub created_at: DateTime<Utc>,
}

impl MetadataRecord {
    /// Create an uncommitted record
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>, created_at: DateTime<Utc>) -> Self {
        let key = key.into();
        Self {
            transaction_id: transaction_id(created_at, &key),
            key,
            value: value.into(),
            committed_mask: 0,
            created_at,
        }
    }

    /// Whether the sink owning `bit` has applied this record
    #[inline]
    pub fn is_committed_to(&self, bit: u64) -> bool {
        self.committed_mask & bit == bit
    }

    /// Whether every bit of `full_mask` is set
    #[inline]
    pub fn is_fully_committed(&self, full_mask: u64) -> bool {
        self.committed_mask & full_mask == full_mask
    }

    /// Bits of `full_mask` not yet committed
    #[inline]
    pub fn missing_bits(&self, full_mask: u64) -> u64 {
        full_mask & !self.committed_mask
    }

    /// Payload as text (lossy for non UTF-8 values)
    pub fn value_as_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}
