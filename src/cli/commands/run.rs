//! Run command - build a project, then launch the image

use crate::cli::args::RunArgs;
use crate::cli::commands::build::{build_project, BuildOptions};
use crate::cli::commands::launch::launch_image;
use crate::cli::commands::{open_store, project_dir};
use crate::config::Config;
use crate::error::SlipwayResult;
use crate::ui::{self, UiContext};

/// Execute the run command
pub async fn execute(args: RunArgs, config: &Config) -> SlipwayResult<()> {
    let ctx = UiContext::detect();
    let project = project_dir(args.project.as_deref()).await?;
    let options = BuildOptions {
        tag: args.tag,
        no_cache: args.no_cache,
        workers: args.overrides.workers,
    };

    ui::intro(&ctx, "slipway run");
    let image = build_project(&ctx, config, &project, &options).await?;

    ui::section(&ctx, &format!("Launching {}", image.short_id()));
    let store = open_store(config).await?;
    launch_image(&ctx, config, &store, &image, &args.overrides).await
}
