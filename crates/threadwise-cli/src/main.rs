//! Threadwise command-line harness.
//!
//! Binary name: `threadwise`
//!
//! Validates configuration files and replays recorded messages through the
//! decision engine over in-memory stores.

mod cli;

use clap::Parser;

use cli::{Cli, Commands};
use threadwise_observe::{LogFormat, TracingOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let tracing_options = TracingOptions {
        verbosity: cli.verbose,
        format: if cli.log_json {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
        enable_otel: cli.otel,
    };
    threadwise_observe::init_tracing(&tracing_options)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let outcome = match cli.command {
        Commands::CheckConfig { path } => cli::check_config::check_config(&path, cli.json).await,
        Commands::Evaluate {
            config,
            history,
            messages,
            events,
        } => {
            let args = cli::evaluate::EvaluateArgs {
                config,
                history,
                messages,
                events,
            };
            cli::evaluate::evaluate(&args, cli.json).await
        }
    };

    threadwise_observe::shutdown_tracing();
    outcome
}
