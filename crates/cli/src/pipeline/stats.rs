//! Pipeline statistics.

use std::time::Duration;

use dispatcher::MetricsSnapshot;

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Total duration of the pipeline run
    pub duration: Duration,

    /// Active sinks in the last poll (known in `once` mode)
    pub active_sinks: Option<usize>,

    /// Per-sink delivery counters
    pub sink_metrics: Vec<(String, MetricsSnapshot)>,

    /// Records moved to the archive
    pub records_archived: usize,

    /// Records still queued at exit
    pub queue_depth: u64,
}

impl PipelineStats {
    /// Deliveries persisted across all sinks
    pub fn delivered(&self) -> u64 {
        self.sink_metrics
            .iter()
            .map(|(_, m)| m.delivered_count)
            .sum()
    }

    /// Failed or timed-out attempts across all sinks
    pub fn failed(&self) -> u64 {
        self.sink_metrics
            .iter()
            .map(|(_, m)| m.failure_count + m.timeout_count)
            .sum()
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Fan-out Statistics                        ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        if let Some(active) = self.active_sinks {
            println!("   ├─ Active sinks: {}", active);
        }
        println!("   ├─ Delivered: {}", self.delivered());
        println!("   ├─ Failed attempts: {}", self.failed());
        println!("   ├─ Archived: {}", self.records_archived);
        println!("   └─ Queue depth: {}", self.queue_depth);

        if !self.sink_metrics.is_empty() {
            println!("\n📮 Sinks");
            for (i, (name, m)) in self.sink_metrics.iter().enumerate() {
                let prefix = if i == self.sink_metrics.len() - 1 {
                    "└─"
                } else {
                    "├─"
                };
                println!(
                    "   {} {}: {} attempts, {} delivered, {} failed, {} timed out",
                    prefix,
                    name,
                    m.attempt_count,
                    m.delivered_count,
                    m.failure_count,
                    m.timeout_count
                );
            }
        }

        println!();
    }
}
