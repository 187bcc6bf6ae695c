//! Launch command - materialize an image and supervise its workers

use crate::build::DEPS_PREFIX;
use crate::cli::args::{LaunchArgs, LaunchOverrides};
use crate::cli::commands::open_store;
use crate::cli::commands::supervise::{run_supervisor, worker_env, WorkerSetup};
use crate::config::schema::LaunchSettings;
use crate::config::{Config, ConfigManager};
use crate::error::{SlipwayError, SlipwayResult};
use crate::layer::tree::image_path;
use crate::layer::{Image, LayerStore};
use crate::supervisor::LaunchConfig;
use crate::ui::{self, TaskSpinner, UiContext};
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// Execute the launch command
pub async fn execute(args: LaunchArgs, config: &Config) -> SlipwayResult<()> {
    let ctx = UiContext::detect();
    let store = open_store(config).await?;
    let image = store.resolve_image(&args.image).await?;

    ui::intro(&ctx, &format!("slipway launch {}", image.short_id()));
    launch_image(&ctx, config, &store, &image, &args.overrides).await
}

/// Launch configuration from the image start command plus CLI overrides.
///
/// `settings` only fills in worker runtime values the start command did
/// not record.
pub(crate) fn launch_config(
    image: &Image,
    overrides: &LaunchOverrides,
    settings: &LaunchSettings,
) -> SlipwayResult<LaunchConfig> {
    let mut launch = LaunchConfig::from_entrypoint(&image.config.entrypoint, settings)?;
    if let Some(workers) = overrides.workers {
        launch.worker_count = workers;
    }
    if let Some(port) = overrides.port {
        launch.port = port;
    }
    if let Some(bind) = &overrides.bind {
        launch.bind_address = bind.parse().map_err(|_| {
            SlipwayError::LaunchInvalid(format!("bind address '{}' is not an IP address", bind))
        })?;
    }
    launch.validate()?;
    Ok(launch)
}

/// Materialize `image` into a fresh run directory and supervise it there.
///
/// The run directory is removed once the workers have terminated.
pub(crate) async fn launch_image(
    ctx: &UiContext,
    config: &Config,
    store: &LayerStore,
    image: &Image,
    overrides: &LaunchOverrides,
) -> SlipwayResult<()> {
    let launch = launch_config(image, overrides, &config.launch)?;

    let run_dir = ConfigManager::runs_dir().join(format!(
        "{}-{}",
        image.short_id(),
        &Uuid::new_v4().simple().to_string()[..8]
    ));
    let rootfs = run_dir.join("rootfs");

    let result: SlipwayResult<()> = async {
        let mut spinner = TaskSpinner::new(ctx);
        spinner.start(&format!("Materializing {} layers", image.layers.len()));
        if let Err(e) = store.materialize(image, &rootfs).await {
            spinner.stop_error("Materialize failed");
            return Err(e);
        }
        spinner.stop(&format!("Root filesystem ready at {}", rootfs.display()));

        let env_file = overrides
            .env_file
            .as_deref()
            .or(config.launch.env_file.as_deref());
        let setup = WorkerSetup {
            app_dir: image_path(&rootfs, &image.config.workdir)?,
            site_packages: image_path(&rootfs, DEPS_PREFIX)?,
            env: worker_env(&image.config.env, env_file, &overrides.env).await?,
        };

        run_supervisor(ctx, config, launch, setup, Some(&image.id)).await
    }
    .await;

    remove_run_dir(&run_dir).await;
    result
}

async fn remove_run_dir(run_dir: &Path) {
    if !run_dir.exists() {
        return;
    }
    match tokio::fs::remove_dir_all(run_dir).await {
        Ok(()) => debug!("Removed run directory {}", run_dir.display()),
        Err(e) => warn!("Failed to remove run directory {}: {}", run_dir.display(), e),
    }
}
