//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Slipway - layered image builds and pre-fork web workers
///
/// Builds a reproducible, layer-cached runtime image for a web application
/// and launches it under a supervisor that shares one listening socket
/// across a fixed pool of worker processes.
#[derive(Parser, Debug)]
#[command(name = "slipway")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "SLIPWAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip local slipway.toml discovery
    #[arg(long, global = true)]
    pub no_local: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a project-local slipway.toml
    Init(InitArgs),

    /// Build an image from a project directory
    Build(BuildArgs),

    /// Launch a built image under the supervisor
    Launch(LaunchArgs),

    /// Build a project and launch the resulting image
    Run(RunArgs),

    /// Supervise workers for an application in the current directory
    Supervise(SuperviseArgs),

    /// List built images
    Images(ImagesArgs),

    /// Show the layers and launch metadata of an image
    Inspect(InspectArgs),

    /// Manage the layer store
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the init command
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Overwrite existing slipway.toml
    #[arg(short, long)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(short, long)]
    pub path: Option<PathBuf>,
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Project directory (defaults to current directory)
    pub project: Option<PathBuf>,

    /// Tag the built image
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Rebuild every layer instead of reusing cached ones
    #[arg(long)]
    pub no_cache: bool,

    /// Worker count recorded in the image start command
    #[arg(short, long)]
    pub workers: Option<usize>,
}

/// Launch overrides shared by `launch` and `run`
#[derive(Parser, Debug, Default)]
pub struct LaunchOverrides {
    /// Number of worker processes
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Interface to bind
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Additional environment variables (KEY=VALUE)
    #[arg(short, long, value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,

    /// dotenv-style file merged into the worker environment
    #[arg(long)]
    pub env_file: Option<PathBuf>,
}

/// Arguments for the launch command
#[derive(Parser, Debug)]
pub struct LaunchArgs {
    /// Image tag or id prefix
    pub image: String,

    #[command(flatten)]
    pub overrides: LaunchOverrides,
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Project directory (defaults to current directory)
    pub project: Option<PathBuf>,

    /// Tag the built image
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Rebuild every layer instead of reusing cached ones
    #[arg(long)]
    pub no_cache: bool,

    #[command(flatten)]
    pub overrides: LaunchOverrides,
}

/// Arguments for the supervise command.
///
/// This is the start command recorded in every image.
#[derive(Parser, Debug)]
pub struct SuperviseArgs {
    /// Application entry point (module:callable)
    pub entry_point: String,

    /// Number of worker processes
    #[arg(short, long, default_value = "1")]
    pub workers: usize,

    /// Address to bind (IP:PORT)
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Application directory (defaults to current directory)
    #[arg(long)]
    pub chdir: Option<PathBuf>,

    /// Additional environment variables (KEY=VALUE)
    #[arg(short, long, value_parser = parse_env_var)]
    pub env: Vec<(String, String)>,

    /// dotenv-style file merged into the worker environment
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Interpreter for the built-in gateway worker
    #[arg(long)]
    pub interpreter: Option<String>,

    /// Seconds workers get to exit after SIGTERM
    #[arg(long)]
    pub grace_secs: Option<u64>,

    /// Custom worker command template, given after `--`
    #[arg(last = true)]
    pub worker_command: Vec<String>,
}

/// Arguments for the images command
#[derive(Parser, Debug)]
pub struct ImagesArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the inspect command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Image tag or id prefix
    pub image: String,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listing commands
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List stored layers
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Remove layers no image references
    Prune {
        /// Show what would be removed without removing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Remove every layer, image and tag
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Parse environment variable in KEY=VALUE format
fn parse_env_var(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE format: no '=' found in '{s}'"))?;
    if pos == 0 {
        return Err(format!("invalid KEY=VALUE format: empty key in '{s}'"));
    }
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}
