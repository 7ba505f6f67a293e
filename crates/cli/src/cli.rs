//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Fanout - reliable multi-sink metadata fan-out
#[derive(Parser, Debug)]
#[command(
    name = "fanout",
    author,
    version,
    about = "Reliable multi-sink metadata fan-out",
    long_about = "Publishes key/value metadata updates into a durable queue and delivers\n\
                  every update to each registered sink at least once, tracking per-sink\n\
                  delivery in a commit bitmask on each record."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "FANOUT_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "FANOUT_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the distributor and retention loops
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration and queue information
    Info(InfoArgs),

    /// Publish one key/value update
    Publish(PublishArgs),

    /// Manage the sink registry
    Sinks(SinksArgs),
}

/// Configuration source shared by every command
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "fanout.toml", env = "FANOUT_CONFIG")]
    pub config: PathBuf,

    /// Override the store URL from configuration
    #[arg(long, env = "FANOUT_STORE_URL")]
    pub store_url: Option<String>,
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Run one poll and one compaction pass, then exit
    #[arg(long)]
    pub once: bool,

    /// Stop after this many seconds (0 = run until signalled)
    #[arg(long, default_value = "0", env = "FANOUT_TIMEOUT")]
    pub timeout: u64,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "FANOUT_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "fanout.toml", env = "FANOUT_CONFIG")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `publish` command
#[derive(Parser, Debug)]
pub struct PublishArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Metadata key
    pub key: String,

    /// Value as JSON (e.g. '"text"', '[1,2]', '{"limit":10}')
    pub value: String,
}

/// Arguments for the `sinks` command
#[derive(Parser, Debug)]
pub struct SinksArgs {
    #[command(subcommand)]
    pub command: SinksCommand,
}

/// Sink registry commands
#[derive(Subcommand, Debug)]
pub enum SinksCommand {
    /// Register the `[[sinks]]` seeds from configuration
    Register(RegisterArgs),

    /// Retire a registered sink
    Retire(RetireArgs),

    /// List registered sinks
    List(ListArgs),
}

/// Arguments for `sinks register`
#[derive(Parser, Debug)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Register only this seed
    #[arg(long)]
    pub only: Option<String>,
}

/// Arguments for `sinks retire`
#[derive(Parser, Debug)]
pub struct RetireArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Instance id of the sink to retire
    pub instance_id: String,
}

/// Arguments for `sinks list`
#[derive(Parser, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_once() {
        let cli = Cli::try_parse_from(["fanout", "-v", "run", "-c", "x.toml", "--once"]).unwrap();
        assert_eq!(cli.verbose, 1);
        match cli.command {
            Commands::Run(args) => {
                assert!(args.once);
                assert_eq!(args.config.config, PathBuf::from("x.toml"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_sinks_retire() {
        let cli = Cli::try_parse_from(["fanout", "sinks", "retire", "edge-cache"]).unwrap();
        match cli.command {
            Commands::Sinks(SinksArgs {
                command: SinksCommand::Retire(args),
            }) => assert_eq!(args.instance_id, "edge-cache"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_publish_requires_value() {
        assert!(Cli::try_parse_from(["fanout", "publish", "key-only"]).is_err());
    }
}
