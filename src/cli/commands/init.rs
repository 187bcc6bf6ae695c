//! Init command - create project-local slipway.toml

use crate::cli::args::InitArgs;
use crate::config::LOCAL_CONFIG_FILE;
use crate::error::{SlipwayError, SlipwayResult};
use crate::ui::{self, UiContext};
use std::path::Path;
use tokio::fs;

/// Template for project-local config
const INIT_TEMPLATE: &str = r#"# Slipway project configuration
# Settings here override your global config (~/.config/slipway/config.toml)

[build]
# Base runtime, pinned to an exact version or an @sha256: digest
# base = "python:3.12.4-slim"
workdir = "/app"
manifest = "requirements.txt"
source = "."
port = 8080
# ignore = [".git", "__pycache__", ".venv", "target", ".env"]

# [build.env]
# APP_MODE = "production"

# [bases]
# "python:3.12.4-slim" = "../bases/python-3.12.4"

[install]
# backend = "index"                 # index, command
# index = "../packages"
# command = ["pip", "install", "--no-cache-dir", "--target", "{target}", "-r", "{manifest}"]

[launch]
entry_point = "app:app"
workers = 2
# bind = "0.0.0.0"
# env_file = ".env"
# grace_secs = 10
"#;

/// Execute the init command
pub async fn execute(args: InitArgs) -> SlipwayResult<()> {
    let ctx = UiContext::detect();

    let target_dir = match args.path {
        Some(ref p) => p.clone(),
        None => std::env::current_dir()
            .map_err(|e| SlipwayError::io("getting current directory", e))?,
    };

    let config_path = target_dir.join(LOCAL_CONFIG_FILE);

    if config_path.exists() && !args.force {
        return Err(SlipwayError::User(format!(
            "{} already exists. Use --force to overwrite.",
            config_path.display()
        )));
    }

    ensure_dir(&target_dir).await?;

    fs::write(&config_path, INIT_TEMPLATE)
        .await
        .map_err(|e| SlipwayError::io(format!("writing {}", config_path.display()), e))?;

    ui::step_ok_detail(
        &ctx,
        "Created project config",
        &config_path.display().to_string(),
    );
    ui::remark(&ctx, "Set build.base and add it to [bases], then run: slipway build");

    Ok(())
}

async fn ensure_dir(dir: &Path) -> SlipwayResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| SlipwayError::io(format!("creating directory {}", dir.display()), e))?;
    }
    Ok(())
}
