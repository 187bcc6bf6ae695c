//! Slipway - layered image builds and pre-fork web workers
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use slipway::cli::{Cli, Commands};
use slipway::config::ConfigManager;
use slipway::error::{SlipwayError, SlipwayResult};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> SlipwayResult<()> {
    let cli = Cli::parse();

    // Init command doesn't need config loading
    if let Commands::Init(args) = cli.command {
        init_logging(cli.verbose, false);
        return slipway::cli::commands::init(args).await;
    }

    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };

    // Project commands look for slipway.toml from the project directory
    let discovery_root = match &cli.command {
        Commands::Build(args) => args.project.clone(),
        Commands::Run(args) => args.project.clone(),
        Commands::Supervise(args) => args.chdir.clone(),
        _ => None,
    };

    let local_config_path = if cli.no_local {
        None
    } else {
        let start = match discovery_root {
            Some(dir) => dir,
            None => current_dir()?,
        };
        let start = start.canonicalize().unwrap_or(start);
        ConfigManager::find_local_config(&start)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    init_logging(cli.verbose, config.general.log_format == "json");
    match &local_config_path {
        Some(path) => debug!("Using local config: {}", path.display()),
        None if cli.no_local => debug!("Local config discovery disabled (--no-local)"),
        None => debug!("No local config found"),
    }

    ConfigManager::ensure_state_dirs().await?;

    match cli.command {
        Commands::Init(_) => unreachable!("Init handled above"),
        Commands::Build(args) => slipway::cli::commands::build(args, &config).await,
        Commands::Launch(args) => slipway::cli::commands::launch(args, &config).await,
        Commands::Run(args) => slipway::cli::commands::run(args, &config).await,
        Commands::Supervise(args) => slipway::cli::commands::supervise(args, &config).await,
        Commands::Images(args) => slipway::cli::commands::images(args, &config).await,
        Commands::Inspect(args) => slipway::cli::commands::inspect(args, &config).await,
        Commands::Cache(args) => slipway::cli::commands::cache(args, &config).await,
        Commands::Config(args) => {
            slipway::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` wins when set
fn init_logging(verbose: u8, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("slipway=warn"),
        1 => EnvFilter::new("slipway=info"),
        _ => EnvFilter::new("slipway=debug"),
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

fn current_dir() -> SlipwayResult<PathBuf> {
    std::env::current_dir().map_err(|e| SlipwayError::io("getting current directory", e))
}
