//! RetentionCompactor - bounds the queue per key

use std::sync::Arc;
use std::time::Duration;

use contracts::{QueueStore, RetentionConfig, RetentionPolicy, SinkStore};
use dispatcher::{full_mask_of, AdapterFactory, KindTable, SinkRegistry};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::RetentionError;

/// Shortest interval accepted by [`RetentionCompactor::with_interval`]
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Outcome of one compaction pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Keys at or above the threshold
    pub keys_examined: usize,
    /// Records moved to the archive
    pub records_archived: usize,
    /// Pass stopped early on cancellation
    pub cancelled: bool,
}

/// Archives the oldest records of every key that reached the threshold
///
/// With [`RetentionPolicy::IgnoreCommitState`] eligibility is by count and age
/// only, so a record may be archived before every sink has it.
///
/// With [`RetentionPolicy::RequireFullyDelivered`] the required bits are
/// those of the sinks the Distributor would deliver to: rows with an unknown
/// kind, an unusable config or a duplicate bit are resolved through the same
/// [`SinkRegistry`] and left out.
pub struct RetentionCompactor<S, F: AdapterFactory = KindTable> {
    store: Arc<S>,
    registry: Mutex<SinkRegistry<F>>,
    threshold: usize,
    policy: RetentionPolicy,
    interval: Duration,
}

impl<S> RetentionCompactor<S, KindTable>
where
    S: QueueStore + SinkStore + Send + Sync + 'static,
{
    /// Create a compactor over the built-in sink kinds
    ///
    /// # Errors
    /// `ZeroThreshold` if `threshold` is 0.
    pub fn new(
        store: Arc<S>,
        threshold: usize,
        policy: RetentionPolicy,
    ) -> Result<Self, RetentionError> {
        Self::with_factory(store, KindTable, threshold, policy)
    }

    /// Create a compactor from the `[retention]` section
    pub fn from_config(store: Arc<S>, config: &RetentionConfig) -> Result<Self, RetentionError> {
        Ok(Self::new(store, config.threshold, config.policy)?
            .with_interval(Duration::from_millis(config.interval_ms)))
    }
}

impl<S, F> RetentionCompactor<S, F>
where
    S: QueueStore + SinkStore + Send + Sync + 'static,
    F: AdapterFactory + Send + Sync + 'static,
{
    /// Create a compactor resolving sinks with a custom adapter factory
    pub fn with_factory(
        store: Arc<S>,
        factory: F,
        threshold: usize,
        policy: RetentionPolicy,
    ) -> Result<Self, RetentionError> {
        if threshold == 0 {
            return Err(RetentionError::ZeroThreshold);
        }
        Ok(Self {
            store,
            registry: Mutex::new(SinkRegistry::new(factory)),
            threshold,
            policy,
            interval: Duration::from_millis(60_000),
        })
    }

    /// Set the interval used by [`run`](Self::run), at least [`MIN_INTERVAL`]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(?interval, min = ?MIN_INTERVAL, "Compaction interval too short, clamping");
        }
        self.interval = interval.max(MIN_INTERVAL);
        self
    }

    async fn required_mask(&self) -> Result<Option<u64>, RetentionError> {
        match self.policy {
            RetentionPolicy::IgnoreCommitState => Ok(None),
            RetentionPolicy::RequireFullyDelivered => {
                let active = self
                    .registry
                    .lock()
                    .await
                    .load_active(self.store.as_ref())
                    .await?;
                Ok(Some(full_mask_of(&active)))
            }
        }
    }

    /// Run one compaction pass
    ///
    /// Each key is archived in its own store transaction; a failure on one
    /// key aborts the pass but keeps what earlier keys already archived.
    #[instrument(name = "retention_compact", skip(self, cancel), fields(threshold = self.threshold))]
    pub async fn compact(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CompactionReport, RetentionError> {
        let keys = self.store.keys_at_threshold(self.threshold).await?;
        let mut report = CompactionReport {
            keys_examined: keys.len(),
            ..CompactionReport::default()
        };
        if keys.is_empty() {
            return Ok(report);
        }

        let required_mask = self.required_mask().await?;
        for key in &keys {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let archived = self
                .store
                .archive_oldest(key, self.threshold, required_mask)
                .await?;
            debug!(key = %key, archived, "Key compacted");
            observability::record_records_archived(archived);
            report.records_archived += archived;
        }

        Ok(report)
    }

    /// Compact repeatedly until `cancel` fires
    ///
    /// Returns the number of records archived over the whole run.
    pub async fn run(self, cancel: CancellationToken) -> usize {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            threshold = self.threshold,
            policy = ?self.policy,
            interval_ms = self.interval.as_millis() as u64,
            "Retention compactor started"
        );

        let mut total = 0;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.compact(&cancel).await {
                Ok(report) if report.records_archived > 0 => {
                    total += report.records_archived;
                    info!(
                        keys = report.keys_examined,
                        archived = report.records_archived,
                        "Compaction finished"
                    );
                }
                Ok(_) => debug!("Nothing to compact"),
                Err(e) => error!(error = %e, "Compaction failed, retrying next tick"),
            }
        }

        info!(archived = total, "Retention compactor stopped");
        total
    }

    /// Spawn the loop as a task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<usize> {
        tokio::spawn(self.run(cancel))
    }
}
