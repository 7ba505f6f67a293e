//! Distributor - polls the queue and fans pending records out to sinks

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{ContractError, DeliveryAdapter, MetadataRecord, QueueStore, SinkStore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::DispatcherError;
use crate::metrics::{MetricsSnapshot, SinkMetrics};
use crate::registry::{full_mask_of, ActiveSink, AdapterFactory, KindTable, SinkRegistry};

/// Shortest poll interval the loop accepts
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Distributor configuration
#[derive(Debug, Clone)]
pub struct DistributorConfig {
    /// Delay between poll starts, raised to [`MIN_POLL_INTERVAL`] if shorter
    pub poll_interval: Duration,
    /// Upper bound on a single `apply` call
    pub delivery_timeout: Duration,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self::from(&contracts::DistributorConfig::default())
    }
}

impl From<&contracts::DistributorConfig> for DistributorConfig {
    fn from(config: &contracts::DistributorConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            delivery_timeout: Duration::from_millis(config.delivery_timeout_ms),
        }
    }
}

/// Outcome of one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// OR of the active bits used for selection
    pub full_mask: u64,
    /// Sinks that resolved to an adapter
    pub active_sinks: usize,
    /// Records selected as pending
    pub records_selected: usize,
    /// `apply` calls made
    pub attempts: u64,
    /// Deliveries whose bit was persisted
    pub delivered: u64,
    /// `apply` calls that returned an error
    pub failed: u64,
    /// `apply` calls cut off by the delivery timeout
    pub timed_out: u64,
    /// Deliveries applied but whose bit could not be persisted
    pub persist_errors: u64,
    /// Records that disappeared from the queue mid-poll
    pub vanished: u64,
    /// Poll stopped early on cancellation
    pub cancelled: bool,
}

impl PollReport {
    /// Nothing was attempted
    pub fn is_idle(&self) -> bool {
        self.attempts == 0
    }
}

enum Attempt {
    Applied,
    Failed(ContractError),
    TimedOut,
    Cancelled,
}

/// Polling fan-out loop
///
/// Each poll reloads the active sink set, selects every record missing at
/// least one active bit, and applies it to each sink whose bit is unset, in
/// record order and then bit order. Successful deliveries persist the bit
/// immediately; failures leave it unset for the next poll.
pub struct Distributor<S, F: AdapterFactory = KindTable> {
    store: Arc<S>,
    registry: SinkRegistry<F>,
    config: DistributorConfig,
    metrics: HashMap<String, Arc<SinkMetrics>>,
}

impl<S> Distributor<S, KindTable>
where
    S: QueueStore + SinkStore + Send + Sync + 'static,
{
    /// Create a distributor over the built-in sink kinds
    pub fn new(store: Arc<S>, config: DistributorConfig) -> Self {
        Self::with_factory(store, KindTable, config)
    }
}

impl<S, F> Distributor<S, F>
where
    S: QueueStore + SinkStore + Send + Sync + 'static,
    F: AdapterFactory + Send + Sync + 'static,
{
    /// Create a distributor with a custom adapter factory
    pub fn with_factory(store: Arc<S>, factory: F, mut config: DistributorConfig) -> Self {
        if config.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                poll_interval = ?config.poll_interval,
                min = ?MIN_POLL_INTERVAL,
                "Poll interval too short, clamping"
            );
            config.poll_interval = MIN_POLL_INTERVAL;
        }
        Self {
            store,
            registry: SinkRegistry::new(factory),
            config,
            metrics: HashMap::new(),
        }
    }

    /// Delivery counters of the sinks active in the last poll
    pub fn metrics(&self) -> Vec<(String, MetricsSnapshot)> {
        let mut out: Vec<_> = self
            .metrics
            .iter()
            .map(|(name, m)| (name.clone(), m.snapshot()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    fn sink_metrics(&mut self, instance_id: &str) -> Arc<SinkMetrics> {
        Arc::clone(
            self.metrics
                .entry(instance_id.to_string())
                .or_insert_with(|| Arc::new(SinkMetrics::new())),
        )
    }

    /// Run one poll
    ///
    /// # Errors
    /// Registry or pending-selection failure aborts the poll before any
    /// delivery. Everything after that is counted in the report instead.
    #[instrument(name = "distributor_poll", skip(self, cancel))]
    pub async fn poll(&mut self, cancel: &CancellationToken) -> Result<PollReport, DispatcherError> {
        let started = Instant::now();

        let sinks = self
            .registry
            .load_active(self.store.as_ref())
            .await
            .map_err(DispatcherError::Registry)?;
        let full_mask = full_mask_of(&sinks);
        observability::record_active_sinks(sinks.len());
        // Counters of retired or dropped sinks go with them
        self.metrics
            .retain(|id, _| sinks.iter().any(|s| s.instance_id() == id.as_str()));

        let mut report = PollReport {
            full_mask,
            active_sinks: sinks.len(),
            ..PollReport::default()
        };

        // No active sinks: nothing is pending by definition
        if full_mask == 0 {
            debug!("No active sinks, skipping poll");
            return Ok(report);
        }

        let pending = self.store.pending(full_mask).await?;
        report.records_selected = pending.len();
        observability::record_pending_records(pending.len());

        'records: for record in &pending {
            for sink in &sinks {
                if record.is_committed_to(sink.bit()) {
                    continue;
                }
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'records;
                }

                let metrics = self.sink_metrics(sink.instance_id());
                metrics.inc_attempt_count();
                report.attempts += 1;

                match self.attempt(sink, record, cancel).await {
                    Attempt::Applied => {
                        match self
                            .store
                            .mark_committed(&record.transaction_id, sink.bit())
                            .await
                        {
                            Ok(true) => {
                                report.delivered += 1;
                                metrics.inc_delivered_count();
                                observability::record_delivery(sink.instance_id(), "delivered");
                            }
                            Ok(false) => {
                                // Archived underneath us; remaining sinks would only redo work
                                debug!(
                                    transaction_id = %record.transaction_id,
                                    "Record left the queue mid-poll"
                                );
                                report.vanished += 1;
                                continue 'records;
                            }
                            Err(e) => {
                                error!(
                                    sink = %sink.instance_id(),
                                    transaction_id = %record.transaction_id,
                                    error = %e,
                                    "Applied but failed to persist commit bit"
                                );
                                report.persist_errors += 1;
                                observability::record_delivery(sink.instance_id(), "persist_error");
                            }
                        }
                    }
                    Attempt::Failed(e) => {
                        warn!(
                            sink = %sink.instance_id(),
                            key = %record.key,
                            error = %e,
                            "Delivery failed, will retry next poll"
                        );
                        report.failed += 1;
                        metrics.inc_failure_count();
                        observability::record_delivery(sink.instance_id(), "failed");
                    }
                    Attempt::TimedOut => {
                        warn!(
                            sink = %sink.instance_id(),
                            key = %record.key,
                            timeout_ms = self.config.delivery_timeout.as_millis() as u64,
                            "Delivery timed out, will retry next poll"
                        );
                        report.timed_out += 1;
                        metrics.inc_timeout_count();
                        observability::record_delivery(sink.instance_id(), "timeout");
                    }
                    Attempt::Cancelled => {
                        report.cancelled = true;
                        break 'records;
                    }
                }
            }
        }

        observability::record_poll_duration_ms(started.elapsed().as_secs_f64() * 1000.0);
        Ok(report)
    }

    async fn attempt(
        &self,
        sink: &ActiveSink<F::Adapter>,
        record: &MetadataRecord,
        cancel: &CancellationToken,
    ) -> Attempt {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Attempt::Cancelled,
            result = tokio::time::timeout(self.config.delivery_timeout, sink.adapter.apply(record)) => {
                match result {
                    Ok(Ok(())) => Attempt::Applied,
                    // The adapter's own timeout
                    Ok(Err(ContractError::DeliveryTimeout { .. })) => Attempt::TimedOut,
                    Ok(Err(e)) => Attempt::Failed(e),
                    Err(_) => Attempt::TimedOut,
                }
            }
        }
    }

    /// Poll repeatedly until `cancel` fires
    ///
    /// A failed poll is logged and the loop waits for the next tick. Returns
    /// the final per-sink counters.
    pub async fn run(mut self, cancel: CancellationToken) -> Vec<(String, MetricsSnapshot)> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Distributor started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.poll(&cancel).await {
                Ok(report) if report.is_idle() => debug!(?report, "Poll finished"),
                Ok(report) => info!(
                    delivered = report.delivered,
                    failed = report.failed,
                    timed_out = report.timed_out,
                    records = report.records_selected,
                    "Poll finished"
                ),
                Err(e) => error!(error = %e, "Poll failed, retrying next tick"),
            }
        }

        info!("Distributor stopped");
        self.metrics()
    }

    /// Spawn the loop as a task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Vec<(String, MetricsSnapshot)>> {
        tokio::spawn(self.run(cancel))
    }
}
