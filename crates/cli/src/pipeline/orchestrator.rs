//! Pipeline orchestrator - runs the distributor and compactor over one store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use contracts::{FanoutBlueprint, QueueStore};
use dispatcher::{Distributor, DistributorConfig};
use queue_store::SqliteStore;
use retention::RetentionCompactor;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::PipelineStats;
use crate::commands::open_store;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The fan-out configuration
    pub blueprint: FanoutBlueprint,

    /// Run a single poll and compaction pass
    pub once: bool,

    /// Pipeline timeout (None = run until cancelled)
    pub timeout: Option<Duration>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the pipeline until `cancel` fires (or one pass in `once` mode)
    pub async fn run(self, cancel: CancellationToken) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        // Initialize Metrics (optional)
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let store = Arc::new(open_store(blueprint).await?);
        info!(url = %blueprint.store.url, "Store opened");

        let distributor = Distributor::new(
            Arc::clone(&store),
            DistributorConfig::from(&blueprint.distributor),
        );
        let compactor = RetentionCompactor::from_config(Arc::clone(&store), &blueprint.retention)
            .context("Invalid retention settings")?;

        let mut stats = if self.config.once {
            self.run_once(distributor, compactor, &cancel).await?
        } else {
            self.run_loops(distributor, compactor, cancel).await?
        };

        stats.duration = start_time.elapsed();
        stats.queue_depth = store
            .depth()
            .await
            .context("Failed to read queue depth")?;
        Ok(stats)
    }

    async fn run_once(
        &self,
        mut distributor: Distributor<SqliteStore>,
        compactor: RetentionCompactor<SqliteStore>,
        cancel: &CancellationToken,
    ) -> Result<PipelineStats> {
        let report = distributor.poll(cancel).await.context("Poll failed")?;
        info!(
            full_mask = report.full_mask,
            records = report.records_selected,
            delivered = report.delivered,
            failed = report.failed + report.timed_out,
            "Poll finished"
        );

        let compaction = compactor
            .compact(cancel)
            .await
            .context("Compaction failed")?;

        Ok(PipelineStats {
            active_sinks: Some(report.active_sinks),
            sink_metrics: distributor.metrics(),
            records_archived: compaction.records_archived,
            ..PipelineStats::default()
        })
    }

    async fn run_loops(
        &self,
        distributor: Distributor<SqliteStore>,
        compactor: RetentionCompactor<SqliteStore>,
        cancel: CancellationToken,
    ) -> Result<PipelineStats> {
        let distributor_task = distributor.spawn(cancel.clone());
        let compactor_task = compactor.spawn(cancel.clone());

        match self.config.timeout {
            Some(timeout) => {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(timeout) => {
                        warn!(timeout_secs = timeout.as_secs(), "Pipeline timeout reached");
                        cancel.cancel();
                    }
                }
            }
            None => cancel.cancelled().await,
        }

        let sink_metrics = distributor_task
            .await
            .context("Distributor task failed")?;
        let records_archived = compactor_task.await.context("Compactor task failed")?;

        Ok(PipelineStats {
            sink_metrics,
            records_archived,
            ..PipelineStats::default()
        })
    }
}
