//! `publish` command implementation.

use anyhow::{Context, Result};
use queue_store::Producer;
use tracing::info;

use crate::cli::PublishArgs;
use crate::commands::{load_blueprint, open_store};
use crate::error::CliError;

/// Execute the `publish` command
pub async fn run_publish(args: &PublishArgs) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(&args.value).map_err(|e| CliError::invalid_value(e.to_string()))?;

    let blueprint = load_blueprint(&args.config)?;
    let store = open_store(&blueprint).await?;

    let record = Producer::new()
        .enqueue(&store, &args.key, &value)
        .await
        .with_context(|| format!("Failed to publish key '{}'", args.key))?;

    info!(
        key = %record.key,
        transaction_id = %record.transaction_id,
        "Record published"
    );
    println!("{}", record.transaction_id);
    Ok(())
}
