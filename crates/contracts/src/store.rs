//! Persistence contracts
//!
//! The queue and the sink registry are shared, externally persisted state.
//! Implementations must make every single-row update atomic.

use crate::{ContractError, MetadataRecord, SinkDescriptor};

/// Durable backlog of published records
#[trait_variant::make(QueueStore: Send)]
pub trait LocalQueueStore {
    /// Insert a new record
    ///
    /// # Errors
    /// `RecordExists` if the transaction id is already queued.
    async fn insert(&self, record: &MetadataRecord) -> Result<(), ContractError>;

    /// Records with at least one bit of `full_mask` unset, oldest first
    async fn pending(&self, full_mask: u64) -> Result<Vec<MetadataRecord>, ContractError>;

    /// Atomically `committed_mask |= bit`
    ///
    /// Returns `false` if the record no longer exists.
    async fn mark_committed(&self, transaction_id: &str, bit: u64) -> Result<bool, ContractError>;

    /// Look up a queued record
    async fn get(&self, transaction_id: &str) -> Result<Option<MetadataRecord>, ContractError>;

    /// Queued records for `key`, oldest first
    async fn records_for_key(&self, key: &str) -> Result<Vec<MetadataRecord>, ContractError>;

    /// Number of queued records
    async fn depth(&self) -> Result<u64, ContractError>;

    /// Keys with at least `threshold` queued records
    async fn keys_at_threshold(&self, threshold: usize) -> Result<Vec<String>, ContractError>;

    /// Move the oldest `limit` records of `key` to the archive
    ///
    /// When `required_mask` is set, candidates missing any of its bits stay
    /// queued. Copy and delete happen in one transaction. Returns the number
    /// of archived records.
    async fn archive_oldest(
        &self,
        key: &str,
        limit: usize,
        required_mask: Option<u64>,
    ) -> Result<usize, ContractError>;

    /// Archived records for `key`, oldest first
    async fn archived_for_key(&self, key: &str) -> Result<Vec<MetadataRecord>, ContractError>;
}

/// Administratively managed sink registry
#[trait_variant::make(SinkStore: Send)]
pub trait LocalSinkStore {
    /// All registered sinks, ordered by bit
    async fn load_sinks(&self) -> Result<Vec<SinkDescriptor>, ContractError>;

    /// Register a sink
    ///
    /// # Errors
    /// - `InvalidBit` if `bit` is not a single flag position
    /// - `DuplicateSink` if the instance id is taken
    /// - `BitInUse` if an active sink owns the bit
    /// - `BitStillReferenced` if any queued record still has the bit set
    async fn register_sink(&self, descriptor: &SinkDescriptor) -> Result<(), ContractError>;

    /// Remove a sink from the active set
    ///
    /// Returns `false` if no such sink was registered.
    async fn retire_sink(&self, instance_id: &str) -> Result<bool, ContractError>;
}
