//! `validate` command: load a config file and dry-build every sink adapter.

use anyhow::{Context, Result};
use contracts::{FanoutBlueprint, RetentionPolicy};
use dispatcher::{AdapterFactory, KindTable};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::ValidateArgs;

#[derive(Debug, Serialize)]
struct ValidationReport {
    config_path: String,
    #[serde(flatten)]
    outcome: Outcome,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Outcome {
    Valid {
        store_url: String,
        poll_interval_ms: u64,
        retention_threshold: usize,
        retention_policy: RetentionPolicy,
        sinks: Vec<SinkCheck>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
    Invalid {
        error: String,
    },
}

/// Result of building one seeded sink's adapter
#[derive(Debug, Serialize)]
struct SinkCheck {
    instance_id: String,
    bit: u64,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ValidationReport {
    fn is_valid(&self) -> bool {
        match &self.outcome {
            Outcome::Valid { sinks, .. } => sinks.iter().all(|s| s.error.is_none()),
            Outcome::Invalid { .. } => false,
        }
    }
}

pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let report = build_report(args);
    if args.json {
        let json =
            serde_json::to_string_pretty(&report).context("Failed to serialize validation report")?;
        println!("{json}");
    } else {
        print_report(&report);
    }

    if !report.is_valid() {
        anyhow::bail!("Configuration validation failed");
    }
    Ok(())
}

fn build_report(args: &ValidateArgs) -> ValidationReport {
    let config_path = args.config.display().to_string();
    let outcome = if !args.config.exists() {
        Outcome::Invalid {
            error: format!("File not found: {config_path}"),
        }
    } else {
        match config_loader::ConfigLoader::load_from_path(&args.config) {
            Ok(blueprint) => check_blueprint(&blueprint),
            Err(e) => Outcome::Invalid {
                error: e.to_string(),
            },
        }
    };
    ValidationReport {
        config_path,
        outcome,
    }
}

fn check_blueprint(blueprint: &FanoutBlueprint) -> Outcome {
    let sinks = blueprint
        .sinks
        .iter()
        .map(|seed| {
            let error = seed
                .to_descriptor()
                .and_then(|descriptor| KindTable.build(&descriptor).map(drop))
                .err()
                .map(|e| e.to_string());
            if let Some(ref e) = error {
                warn!(sink = %seed.instance_id, error = %e, "Sink adapter cannot be built");
            }
            SinkCheck {
                instance_id: seed.instance_id.clone(),
                bit: seed.bit,
                kind: seed.kind.clone(),
                error,
            }
        })
        .collect();

    Outcome::Valid {
        store_url: blueprint.store.url.clone(),
        poll_interval_ms: blueprint.distributor.poll_interval_ms,
        retention_threshold: blueprint.retention.threshold,
        retention_policy: blueprint.retention.policy,
        sinks,
        warnings: collect_warnings(blueprint),
    }
}

/// Non-fatal findings
fn collect_warnings(blueprint: &FanoutBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();

    if blueprint.sinks.is_empty() {
        warnings.push("no sink seeds configured, `sinks register` has nothing to add".to_string());
    }
    if blueprint.retention.policy == RetentionPolicy::IgnoreCommitState {
        warnings.push(
            "retention.policy = ignore_commit_state may archive records before every sink has them"
                .to_string(),
        );
    }
    let distributor = &blueprint.distributor;
    if distributor.delivery_timeout_ms >= distributor.poll_interval_ms {
        warnings.push(format!(
            "distributor.delivery_timeout_ms ({}) >= poll_interval_ms ({}), a slow sink delays the next poll",
            distributor.delivery_timeout_ms, distributor.poll_interval_ms
        ));
    }

    warnings
}

fn print_report(report: &ValidationReport) {
    match &report.outcome {
        Outcome::Invalid { error } => {
            println!("✗ Configuration is invalid: {}", report.config_path);
            println!("\n  Error: {error}");
        }
        Outcome::Valid {
            store_url,
            poll_interval_ms,
            retention_threshold,
            retention_policy,
            sinks,
            warnings,
        } => {
            let mark = if report.is_valid() { "✓" } else { "✗" };
            println!("{mark} {}", report.config_path);
            println!("\n  Store:     {store_url}");
            println!("  Poll:      every {poll_interval_ms}ms");
            println!("  Retention: {retention_threshold} per key ({retention_policy:?})");
            println!("\n  Sinks ({}):", sinks.len());
            for sink in sinks {
                match &sink.error {
                    None => println!("    ✓ {} [{}] bit {:#x}", sink.instance_id, sink.kind, sink.bit),
                    Some(e) => println!("    ✗ {} [{}]: {e}", sink.instance_id, sink.kind),
                }
            }
            if !warnings.is_empty() {
                println!("\n⚠ Warnings:");
                for warning in warnings {
                    println!("  - {warning}");
                }
            }
        }
    }
}
