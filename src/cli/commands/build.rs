//! Build command - assemble an image from a project directory

use crate::build::{builder_for, BuildPlan};
use crate::cli::args::BuildArgs;
use crate::cli::commands::{format_size, open_store, project_dir};
use crate::config::Config;
use crate::error::SlipwayResult;
use crate::journal::Journal;
use crate::layer::{Image, LayerKind};
use crate::supervisor::LaunchConfig;
use crate::ui::{self, BuildProgress, UiContext};
use serde_json::json;
use std::path::Path;
use tracing::info;

/// Options shared by `build` and `run`
#[derive(Debug, Default)]
pub(crate) struct BuildOptions {
    pub tag: Option<String>,
    pub no_cache: bool,
    pub workers: Option<usize>,
}

/// Execute the build command
pub async fn execute(args: BuildArgs, config: &Config) -> SlipwayResult<()> {
    let ctx = UiContext::detect();
    let project = project_dir(args.project.as_deref()).await?;
    let options = BuildOptions {
        tag: args.tag,
        no_cache: args.no_cache,
        workers: args.workers,
    };

    ui::intro(&ctx, "slipway build");
    let image = build_project(&ctx, config, &project, &options).await?;
    ui::outro_success(&ctx, &format!("Built {}", image.short_id()));
    Ok(())
}

/// Build `project` and report the result, journaling success or failure
pub(crate) async fn build_project(
    ctx: &UiContext,
    config: &Config,
    project: &Path,
    options: &BuildOptions,
) -> SlipwayResult<Image> {
    let journal = Journal::new(config);

    match run_build(ctx, config, project, options).await {
        Ok(image) => {
            journal
                .record(
                    "build.completed",
                    &json!({
                        "project": project.display().to_string(),
                        "image": image.id,
                        "tag": options.tag,
                        "cache_hits": image.cache_hits(),
                        "layers": image.layers.iter().map(|l| l.fingerprint.as_str()).collect::<Vec<_>>(),
                    }),
                )
                .await;
            report(ctx, &image, options.tag.as_deref());
            Ok(image)
        }
        Err(e) => {
            journal
                .record(
                    "build.failed",
                    &json!({
                        "project": project.display().to_string(),
                        "error": e.to_string(),
                    }),
                )
                .await;
            Err(e)
        }
    }
}

async fn run_build(
    ctx: &UiContext,
    config: &Config,
    project: &Path,
    options: &BuildOptions,
) -> SlipwayResult<Image> {
    let mut settings = config.launch.clone();
    if let Some(workers) = options.workers {
        settings.workers = workers;
    }
    let launch = LaunchConfig::from_settings(&settings, config.build.port)?;
    let plan = BuildPlan::from_config(config, project, &launch)?;

    let store = open_store(config).await?;
    let builder = builder_for(config, project, store.clone())?.no_cache(options.no_cache);

    let label = project
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| project.display().to_string());
    let mut progress = BuildProgress::new(ctx, &label, LayerKind::ORDER.len());
    let result = plan.execute(builder, |layer| progress.on_layer(layer)).await;
    progress.finish();
    let image = result?;

    if let Some(tag) = &options.tag {
        store.tag_image(tag, &image.id).await?;
        info!("Tagged {} as {}", image.short_id(), tag);
    }
    Ok(image)
}

fn report(ctx: &UiContext, image: &Image, tag: Option<&str>) {
    for layer in &image.layers {
        ui::step_ok_detail(
            ctx,
            &format!("{:<21} {}", layer.kind, layer.fingerprint.short()),
            &layer.outcome.to_string(),
        );
    }
    ui::key_value(ctx, "Image", &image.id);
    if let Some(tag) = tag {
        ui::key_value(ctx, "Tag", tag);
    }
    ui::key_value(
        ctx,
        "Layers",
        &format!(
            "{} ({} cached, {})",
            image.layers.len(),
            image.cache_hits(),
            format_size(image.size_bytes())
        ),
    );
    ui::key_value(ctx, "Entrypoint", &image.config.entrypoint.join(" "));
}
