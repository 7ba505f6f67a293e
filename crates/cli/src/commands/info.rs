//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{FanoutBlueprint, QueueStore, RetentionPolicy, SinkStore};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::InfoArgs;
use crate::commands::{load_blueprint, open_store};

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    store: StoreInfo,
    distributor: DistributorInfo,
    retention: RetentionInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    seeds: Vec<SinkInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    runtime: Option<RuntimeInfo>,
}

#[derive(Serialize)]
struct StoreInfo {
    url: String,
    max_connections: u32,
}

#[derive(Serialize)]
struct DistributorInfo {
    poll_interval_ms: u64,
    delivery_timeout_ms: u64,
}

#[derive(Serialize)]
struct RetentionInfo {
    threshold: usize,
    interval_ms: u64,
    policy: RetentionPolicy,
}

#[derive(Serialize)]
struct SinkInfo {
    instance_id: String,
    bit: u64,
    kind: String,
}

/// Live state read from the store
#[derive(Serialize)]
struct RuntimeInfo {
    queue_depth: u64,
    full_mask: u64,
    pending: usize,
    active_sinks: Vec<SinkInfo>,
}

/// Execute the `info` command
pub async fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.config.display(), "Loading configuration info");

    let blueprint = load_blueprint(&args.config)?;

    // Store may be unreachable; configuration is still shown
    let runtime = match read_runtime(&blueprint).await {
        Ok(runtime) => Some(runtime),
        Err(e) => {
            warn!(error = %e, "Store unavailable, showing configuration only");
            None
        }
    };

    let info = build_config_info(&blueprint, runtime);
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

async fn read_runtime(blueprint: &FanoutBlueprint) -> Result<RuntimeInfo> {
    let store = open_store(blueprint).await?;
    let sinks = store.load_sinks().await.context("Failed to read registry")?;
    let full_mask = contracts::full_mask(
        sinks
            .iter()
            .map(|s| s.bit)
            .filter(|bit| contracts::is_valid_bit(*bit)),
    );
    let pending = if full_mask == 0 {
        0
    } else {
        store
            .pending(full_mask)
            .await
            .context("Failed to select pending records")?
            .len()
    };

    Ok(RuntimeInfo {
        queue_depth: store.depth().await.context("Failed to read queue depth")?,
        full_mask,
        pending,
        active_sinks: sinks
            .into_iter()
            .map(|s| SinkInfo {
                instance_id: s.instance_id,
                bit: s.bit,
                kind: s.kind,
            })
            .collect(),
    })
}

fn build_config_info(blueprint: &FanoutBlueprint, runtime: Option<RuntimeInfo>) -> ConfigInfo {
    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        store: StoreInfo {
            url: blueprint.store.url.clone(),
            max_connections: blueprint.store.max_connections,
        },
        distributor: DistributorInfo {
            poll_interval_ms: blueprint.distributor.poll_interval_ms,
            delivery_timeout_ms: blueprint.distributor.delivery_timeout_ms,
        },
        retention: RetentionInfo {
            threshold: blueprint.retention.threshold,
            interval_ms: blueprint.retention.interval_ms,
            policy: blueprint.retention.policy,
        },
        seeds: blueprint
            .sinks
            .iter()
            .map(|s| SinkInfo {
                instance_id: s.instance_id.clone(),
                bit: s.bit,
                kind: s.kind.clone(),
            })
            .collect(),
        runtime,
    }
}

fn print_sinks(sinks: &[SinkInfo]) {
    for (i, sink) in sinks.iter().enumerate() {
        let prefix = if i == sinks.len() - 1 { "└─" } else { "├─" };
        println!(
            "   {} {} (bit {:#x}, {})",
            prefix, sink.instance_id, sink.bit, sink.kind
        );
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  Fanout Configuration                        ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("💾 Store");
    println!("   ├─ Version: {}", info.version);
    println!("   ├─ URL: {}", info.store.url);
    println!("   └─ Max connections: {}", info.store.max_connections);

    println!("\n⚙️  Distributor");
    println!("   ├─ Poll interval: {}ms", info.distributor.poll_interval_ms);
    println!(
        "   └─ Delivery timeout: {}ms",
        info.distributor.delivery_timeout_ms
    );

    println!("\n🗄  Retention");
    println!("   ├─ Threshold: {} per key", info.retention.threshold);
    println!("   ├─ Interval: {}ms", info.retention.interval_ms);
    println!("   └─ Policy: {:?}", info.retention.policy);

    if !info.seeds.is_empty() {
        println!("\n🌱 Sink seeds ({})", info.seeds.len());
        print_sinks(&info.seeds);
    }

    match &info.runtime {
        Some(runtime) => {
            println!("\n📮 Registry");
            println!("   ├─ Queue depth: {}", runtime.queue_depth);
            println!("   ├─ Pending: {}", runtime.pending);
            println!("   └─ Full mask: {:#x}", runtime.full_mask);
            if !runtime.active_sinks.is_empty() {
                println!("\n   Active sinks ({})", runtime.active_sinks.len());
                print_sinks(&runtime.active_sinks);
            }
        }
        None => println!("\n📮 Registry: unavailable"),
    }

    println!();
}
