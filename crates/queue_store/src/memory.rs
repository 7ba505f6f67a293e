//! MemoryStore - in-process queue and registry

use std::collections::{BTreeMap, HashMap};

use contracts::{
    is_valid_bit, ContractError, MetadataRecord, QueueStore, SinkDescriptor, SinkStore,
};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    queue: HashMap<String, MetadataRecord>,
    archive: Vec<MetadataRecord>,
    sinks: BTreeMap<String, SinkDescriptor>,
    writes: u64,
}

impl Inner {
    fn sorted<'a>(records: impl Iterator<Item = &'a MetadataRecord>) -> Vec<MetadataRecord> {
        let mut out: Vec<MetadataRecord> = records.cloned().collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        out
    }
}

/// Queue store and sink registry held in memory
///
/// Every operation takes the single lock, so each call is atomic with
/// respect to every other call.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating operations applied so far (inserts, bit updates, archives)
    pub async fn write_count(&self) -> u64 {
        self.inner.lock().await.writes
    }
}

impl QueueStore for MemoryStore {
    async fn insert(&self, record: &MetadataRecord) -> Result<(), ContractError> {
        let mut inner = self.inner.lock().await;
        if inner.queue.contains_key(&record.transaction_id) {
            return Err(ContractError::RecordExists {
                transaction_id: record.transaction_id.clone(),
            });
        }
        inner
            .queue
            .insert(record.transaction_id.clone(), record.clone());
        inner.writes += 1;
        Ok(())
    }

    async fn pending(&self, full_mask: u64) -> Result<Vec<MetadataRecord>, ContractError> {
        let inner = self.inner.lock().await;
        Ok(Inner::sorted(
            inner
                .queue
                .values()
                .filter(|r| !r.is_fully_committed(full_mask)),
        ))
    }

    async fn mark_committed(&self, transaction_id: &str, bit: u64) -> Result<bool, ContractError> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.queue.get_mut(transaction_id) else {
            return Ok(false);
        };
        record.committed_mask |= bit;
        inner.writes += 1;
        Ok(true)
    }

    async fn get(&self, transaction_id: &str) -> Result<Option<MetadataRecord>, ContractError> {
        Ok(self.inner.lock().await.queue.get(transaction_id).cloned())
    }

    async fn records_for_key(&self, key: &str) -> Result<Vec<MetadataRecord>, ContractError> {
        let inner = self.inner.lock().await;
        Ok(Inner::sorted(inner.queue.values().filter(|r| r.key == key)))
    }

    async fn depth(&self) -> Result<u64, ContractError> {
        Ok(self.inner.lock().await.queue.len() as u64)
    }

    async fn keys_at_threshold(&self, threshold: usize) -> Result<Vec<String>, ContractError> {
        let inner = self.inner.lock().await;
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in inner.queue.values() {
            *counts.entry(record.key.as_str()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .filter(|(_, count)| *count >= threshold)
            .map(|(key, _)| key.to_string())
            .collect())
    }

    async fn archive_oldest(
        &self,
        key: &str,
        limit: usize,
        required_mask: Option<u64>,
    ) -> Result<usize, ContractError> {
        let mut inner = self.inner.lock().await;
        let candidates = Inner::sorted(inner.queue.values().filter(|r| r.key == key));

        let mut archived = 0;
        for record in candidates.into_iter().take(limit) {
            if let Some(mask) = required_mask {
                if !record.is_fully_committed(mask) {
                    continue;
                }
            }
            inner.queue.remove(&record.transaction_id);
            inner.archive.push(record);
            archived += 1;
        }
        if archived > 0 {
            inner.writes += 1;
        }
        debug!(key, archived, "Archived records");
        Ok(archived)
    }

    async fn archived_for_key(&self, key: &str) -> Result<Vec<MetadataRecord>, ContractError> {
        let inner = self.inner.lock().await;
        Ok(Inner::sorted(inner.archive.iter().filter(|r| r.key == key)))
    }
}

impl SinkStore for MemoryStore {
    async fn load_sinks(&self) -> Result<Vec<SinkDescriptor>, ContractError> {
        let inner = self.inner.lock().await;
        let mut sinks: Vec<SinkDescriptor> = inner.sinks.values().cloned().collect();
        sinks.sort_by_key(|s| s.bit);
        Ok(sinks)
    }

    async fn register_sink(&self, descriptor: &SinkDescriptor) -> Result<(), ContractError> {
        if !is_valid_bit(descriptor.bit) {
            return Err(ContractError::InvalidBit {
                bit: descriptor.bit,
            });
        }

        let mut inner = self.inner.lock().await;
        if inner.sinks.contains_key(&descriptor.instance_id) {
            return Err(ContractError::DuplicateSink {
                instance_id: descriptor.instance_id.clone(),
            });
        }
        if let Some(owner) = inner.sinks.values().find(|s| s.bit == descriptor.bit) {
            return Err(ContractError::BitInUse {
                bit: descriptor.bit,
                owner: owner.instance_id.clone(),
            });
        }
        let referenced = inner
            .queue
            .values()
            .filter(|r| r.committed_mask & descriptor.bit != 0)
            .count() as u64;
        if referenced > 0 {
            return Err(ContractError::BitStillReferenced {
                bit: descriptor.bit,
                records: referenced,
            });
        }

        inner
            .sinks
            .insert(descriptor.instance_id.clone(), descriptor.clone());
        Ok(())
    }

    async fn retire_sink(&self, instance_id: &str) -> Result<bool, ContractError> {
        Ok(self.inner.lock().await.sinks.remove(instance_id).is_some())
    }
}
