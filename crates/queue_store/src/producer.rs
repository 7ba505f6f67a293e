//! Producer - publish API

use bytes::Bytes;
use contracts::{ContractError, MetadataRecord, QueueStore};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, instrument};

use crate::clock::MonotonicClock;
use crate::sqlite::insert_record;

/// Publishes key/value updates into the queue
///
/// Publication never retries; every failure is returned to the caller, and a
/// failed call leaves no row behind.
#[derive(Debug, Default)]
pub struct Producer {
    clock: MonotonicClock,
}

impl Producer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the record for `key`/`value` without storing it
    pub fn prepare<T>(&self, key: &str, value: &T) -> Result<MetadataRecord, ContractError>
    where
        T: Serialize + ?Sized,
    {
        let payload = Bytes::from(serde_json::to_vec(value)?);
        let created_at = self.clock.now()?;
        Ok(MetadataRecord::new(key, payload, created_at))
    }

    /// Publish through a queue store handle
    #[instrument(name = "producer_enqueue", skip(self, store, value))]
    pub async fn enqueue<S, T>(
        &self,
        store: &S,
        key: &str,
        value: &T,
    ) -> Result<MetadataRecord, ContractError>
    where
        S: QueueStore + Sync,
        T: Serialize + ?Sized,
    {
        let record = self.prepare(key, value)?;
        store.insert(&record).await?;
        debug!(transaction_id = %record.transaction_id, "Record enqueued");
        Ok(record)
    }

    /// Publish on a caller-owned connection or open transaction
    ///
    /// Pass `&mut *tx` to make the publication part of the caller's unit of
    /// work: it becomes visible only if the caller commits.
    #[instrument(name = "producer_enqueue_in", skip(self, conn, value))]
    pub async fn enqueue_in<T>(
        &self,
        conn: &mut SqliteConnection,
        key: &str,
        value: &T,
    ) -> Result<MetadataRecord, ContractError>
    where
        T: Serialize + ?Sized,
    {
        let record = self.prepare(key, value)?;
        insert_record(conn, &record).await?;
        debug!(transaction_id = %record.transaction_id, "Record enqueued in caller transaction");
        Ok(record)
    }
}
