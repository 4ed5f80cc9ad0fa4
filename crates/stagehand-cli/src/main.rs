mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::marker::MarkerSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "stagehand",
    about = "Start a multi-service deployment in dependency order, gated on health",
    version,
    propagate_version = true
)]
struct Cli {
    /// Deployment file (default: nearest stagehand.yaml at or above the current directory)
    #[arg(long, global = true, env = "STAGEHAND_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every unit and supervise until interrupted or all units finish
    Up {
        /// Override a feature toggle, e.g. --toggle SKIP_GRAPH=1 (repeatable)
        #[arg(long = "toggle", value_name = "NAME[=VALUE]")]
        toggles: Vec<String>,

        /// Serve the status API on this address, overriding status.bind
        #[arg(long, value_name = "ADDR")]
        status_bind: Option<String>,
    },

    /// Show the startup order without starting anything
    Plan,

    /// Validate the deployment file for errors and common mistakes
    Validate,

    /// Show resolved feature toggles
    Toggles {
        /// Override a feature toggle, as for `up`
        #[arg(long = "toggle", value_name = "NAME[=VALUE]")]
        toggles: Vec<String>,
    },

    /// Inspect or clear one-time initialization markers
    Marker {
        #[command(subcommand)]
        subcommand: MarkerSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Up { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = root::resolve_config(cli.config.as_deref());

    let result = match cli.command {
        Commands::Up {
            toggles,
            status_bind,
        } => cmd::up::run(&config, &toggles, status_bind, cli.json),
        Commands::Plan => cmd::plan::run(&config, cli.json),
        Commands::Validate => cmd::validate::run(&config, cli.json),
        Commands::Toggles { toggles } => cmd::toggles::run(&config, &toggles, cli.json),
        Commands::Marker { subcommand } => cmd::marker::run(&config, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
