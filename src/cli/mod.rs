// ABOUTME: CLI module wiring arguments, logging setup, and command dispatch
// ABOUTME: Exposes the entry point used by the caravan binary

pub mod args;
pub mod commands;

pub use args::{Args, Commands};

use tracing_subscriber::EnvFilter;

/// Initializes the tracing subscriber. `RUST_LOG` wins when set; otherwise
/// `--verbose` selects debug over info.
pub fn init_logging(verbose: bool, no_color: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .with_ansi(!no_color)
        .with_target(false)
        .init();
}

/// Dispatches the parsed command.
pub async fn execute(command: Commands) -> crate::Result<()> {
    match command {
        Commands::Run { config } => commands::run_workflow(&config).await,
        Commands::Validate { config } => commands::validate_workflow(&config),
        Commands::Backends => {
            commands::list_backends();
            Ok(())
        }
    }
}
