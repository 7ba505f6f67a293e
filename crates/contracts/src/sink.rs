//! Sink contracts - registry descriptors and the delivery adapter interface

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ContractError, MetadataRecord};

/// Sink kind, selects the delivery adapter constructor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Key-value cache (Redis `SET`, no expiry)
    Cache,
    /// HTTP receiver (JSON `POST`)
    Http,
    /// Tracing output only
    Log,
}

impl SinkKind {
    /// All kinds known to the constructor table
    pub const ALL: [SinkKind; 3] = [SinkKind::Cache, SinkKind::Http, SinkKind::Log];

    /// Tag as stored in the registry
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Cache => "cache",
            SinkKind::Http => "http",
            SinkKind::Log => "log",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SinkKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown sink kind '{s}'"))
    }
}

/// Registry row describing one sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkDescriptor {
    /// Stable name
    pub instance_id: String,

    /// Flag value (`1 << n`) owned by this sink
    pub bit: u64,

    /// Kind tag; kept as text so unknown kinds survive loading
    pub kind: String,

    /// Kind-specific configuration (JSON)
    pub config: Vec<u8>,
}

impl SinkDescriptor {
    /// Create a descriptor from a JSON config value
    pub fn new(
        instance_id: impl Into<String>,
        bit: u64,
        kind: impl Into<String>,
        config: &serde_json::Value,
    ) -> Result<Self, ContractError> {
        Ok(Self {
            instance_id: instance_id.into(),
            bit,
            kind: kind.into(),
            config: serde_json::to_vec(config)?,
        })
    }

    /// Resolve the kind tag
    pub fn sink_kind(&self) -> Result<SinkKind, ContractError> {
        self.kind
            .parse::<SinkKind>()
            .map_err(|_| ContractError::UnknownSinkKind {
                instance_id: self.instance_id.clone(),
                kind: self.kind.clone(),
            })
    }

    /// Decode the config into the kind's typed configuration
    pub fn decode_config<T: serde::de::DeserializeOwned>(&self) -> Result<T, ContractError> {
        let bytes: &[u8] = if self.config.is_empty() {
            b"{}"
        } else {
            &self.config
        };
        serde_json::from_slice(bytes)
            .map_err(|e| ContractError::invalid_sink_config(&self.instance_id, e.to_string()))
    }
}

/// Whether `bit` is exactly one flag position
#[inline]
pub fn is_valid_bit(bit: u64) -> bool {
    bit.is_power_of_two()
}

/// Bitwise OR of all bits
pub fn full_mask<I>(bits: I) -> u64
where
    I: IntoIterator<Item = u64>,
{
    bits.into_iter().fold(0, |mask, bit| mask | bit)
}

/// Delivery adapter trait
///
/// Applies one record to one physical sink. Implementations must tolerate
/// being called more than once for the same record.
#[trait_variant::make(DeliveryAdapter: Send)]
pub trait LocalDeliveryAdapter {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Apply the record to the sink
    ///
    /// # Errors
    /// Any failure means "not yet"; the record stays pending for this sink.
    async fn apply(&self, record: &MetadataRecord) -> Result<(), ContractError>;
}
