//! `sinks` command implementation.

use anyhow::{Context, Result};
use contracts::{SinkDescriptor, SinkStore};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{ListArgs, RegisterArgs, RetireArgs, SinksArgs, SinksCommand};
use crate::commands::{load_blueprint, open_store};
use crate::error::CliError;

/// Registry row for display
#[derive(Serialize)]
struct SinkInfo {
    instance_id: String,
    bit: u64,
    kind: String,
    config: serde_json::Value,
}

impl From<&SinkDescriptor> for SinkInfo {
    fn from(descriptor: &SinkDescriptor) -> Self {
        Self {
            instance_id: descriptor.instance_id.clone(),
            bit: descriptor.bit,
            kind: descriptor.kind.clone(),
            config: descriptor.decode_config().unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Execute a `sinks` subcommand
pub async fn run_sinks(args: &SinksArgs) -> Result<()> {
    match &args.command {
        SinksCommand::Register(args) => register(args).await,
        SinksCommand::Retire(args) => retire(args).await,
        SinksCommand::List(args) => list(args).await,
    }
}

async fn register(args: &RegisterArgs) -> Result<()> {
    let blueprint = load_blueprint(&args.config)?;

    let seeds: Vec<_> = blueprint
        .sinks
        .iter()
        .filter(|seed| {
            args.only
                .as_deref()
                .is_none_or(|only| seed.instance_id == only)
        })
        .collect();
    if let Some(ref only) = args.only {
        if seeds.is_empty() {
            return Err(CliError::sink_not_found(only.as_str()).into());
        }
    }

    let store = open_store(&blueprint).await?;
    let registered: Vec<String> = store
        .load_sinks()
        .await
        .context("Failed to read sink registry")?
        .into_iter()
        .map(|d| d.instance_id)
        .collect();

    for seed in seeds {
        if registered.contains(&seed.instance_id) {
            warn!(sink = %seed.instance_id, "Already registered, skipping");
            continue;
        }
        let descriptor = seed.to_descriptor()?;
        store
            .register_sink(&descriptor)
            .await
            .with_context(|| format!("Failed to register sink '{}'", seed.instance_id))?;
        info!(sink = %seed.instance_id, bit = seed.bit, kind = %seed.kind, "Sink registered");
        println!("registered {} (bit {:#x}, {})", seed.instance_id, seed.bit, seed.kind);
    }

    Ok(())
}

async fn retire(args: &RetireArgs) -> Result<()> {
    let blueprint = load_blueprint(&args.config)?;
    let store = open_store(&blueprint).await?;

    let retired = store
        .retire_sink(&args.instance_id)
        .await
        .with_context(|| format!("Failed to retire sink '{}'", args.instance_id))?;
    if !retired {
        return Err(CliError::sink_not_found(args.instance_id.as_str()).into());
    }

    info!(sink = %args.instance_id, "Sink retired");
    println!("retired {}", args.instance_id);
    Ok(())
}

async fn list(args: &ListArgs) -> Result<()> {
    let blueprint = load_blueprint(&args.config)?;
    let store = open_store(&blueprint).await?;
    let sinks = store
        .load_sinks()
        .await
        .context("Failed to read sink registry")?;

    if args.json {
        let rows: Vec<SinkInfo> = sinks.iter().map(SinkInfo::from).collect();
        let json = serde_json::to_string_pretty(&rows).context("Failed to serialize sinks")?;
        println!("{}", json);
        return Ok(());
    }

    if sinks.is_empty() {
        println!("No sinks registered");
        return Ok(());
    }
    println!("{:<24} {:>18}  {}", "INSTANCE", "BIT", "KIND");
    for sink in &sinks {
        println!("{:<24} {:>#18x}  {}", sink.instance_id, sink.bit, sink.kind);
    }
    Ok(())
}
