//! Command implementations.

mod info;
mod publish;
mod run;
mod sinks;
mod validate;

pub use info::run_info;
pub use publish::run_publish;
pub use run::run_service;
pub use sinks::run_sinks;
pub use validate::run_validate;

use anyhow::{Context, Result};
use contracts::FanoutBlueprint;
use queue_store::SqliteStore;
use tracing::info;

use crate::cli::ConfigArgs;
use crate::error::CliError;

/// Load the configuration and apply CLI overrides
pub(crate) fn load_blueprint(args: &ConfigArgs) -> Result<FanoutBlueprint> {
    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if let Some(ref url) = args.store_url {
        info!(url = %url, "Overriding store URL from CLI");
        blueprint.store.url = url.clone();
    }

    Ok(blueprint)
}

/// Open the configured store, creating the schema if missing
pub(crate) async fn open_store(blueprint: &FanoutBlueprint) -> Result<SqliteStore> {
    SqliteStore::connect(&blueprint.store.url, blueprint.store.max_connections)
        .await
        .with_context(|| format!("Failed to open store at {}", blueprint.store.url))
}
