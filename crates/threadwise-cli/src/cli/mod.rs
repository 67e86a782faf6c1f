//! CLI command definitions for the `threadwise` binary.

pub mod check_config;
pub mod evaluate;
pub mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Decide when a chat bot should speak up, and with what context.
#[derive(Parser)]
#[command(name = "threadwise", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed logs on stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "THREADWISE_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a configuration file and print the resolved settings.
    #[command(name = "check-config")]
    CheckConfig {
        /// Path to the TOML configuration.
        #[arg(default_value = threadwise_infra::config::DEFAULT_CONFIG_FILE)]
        path: PathBuf,
    },

    /// Replay messages through the decision engine.
    Evaluate {
        /// Path to the TOML configuration. Defaults apply when missing.
        #[arg(short, long, default_value = threadwise_infra::config::DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// JSON history used to seed the in-memory stores.
        #[arg(long)]
        history: Option<PathBuf>,

        /// JSONL file with one message per line, replayed in order.
        #[arg(short, long)]
        messages: PathBuf,

        /// Also print the decision events published for each message.
        #[arg(long)]
        events: bool,
    },
}
