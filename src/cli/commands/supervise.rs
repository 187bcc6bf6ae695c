//! Supervise command - run the worker pool for an application directory
//!
//! This is the start command recorded in every image. `launch` reuses the
//! same supervision path after materializing an image.

use crate::build::DEPS_PREFIX;
use crate::cli::args::SuperviseArgs;
use crate::config::Config;
use crate::error::{SlipwayError, SlipwayResult};
use crate::journal::Journal;
use crate::supervisor::{
    env_file, shutdown_signal, LaunchConfig, ModuleResolver, Supervisor, WorkerSpec,
};
use crate::ui::{self, UiContext};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where and how workers run
pub(crate) struct WorkerSetup {
    /// Application directory, also the worker cwd
    pub app_dir: PathBuf,
    /// Installed dependency directory
    pub site_packages: PathBuf,
    /// Extra environment for every worker
    pub env: BTreeMap<String, String>,
}

/// Execute the supervise command
pub async fn execute(args: SuperviseArgs, config: &Config) -> SlipwayResult<()> {
    let ctx = UiContext::detect();
    let launch = LaunchConfig::from_args(&args, &config.launch)?;

    let app_dir = match args.chdir {
        Some(ref dir) => dir.clone(),
        None => std::env::current_dir()
            .map_err(|e| SlipwayError::io("getting current directory", e))?,
    };
    let env_file = args.env_file.as_deref().or(config.launch.env_file.as_deref());
    let env = worker_env(&BTreeMap::new(), env_file, &args.env).await?;

    let setup = WorkerSetup {
        app_dir,
        site_packages: PathBuf::from(DEPS_PREFIX),
        env,
    };

    run_supervisor(&ctx, config, launch, setup, None).await
}

/// Merge worker environment: image env, then the env file, then flags
pub(crate) async fn worker_env(
    base: &BTreeMap<String, String>,
    env_file: Option<&Path>,
    flags: &[(String, String)],
) -> SlipwayResult<BTreeMap<String, String>> {
    let mut env = base.clone();
    if let Some(path) = env_file {
        env.extend(env_file::load(path).await?);
    }
    env.extend(flags.iter().cloned());
    Ok(env)
}

/// PYTHONPATH for workers: dependencies and the app first, then any
/// search path the user supplied
fn python_path(setup: &WorkerSetup, existing: Option<&str>) -> String {
    let mut path = format!("{}:{}", setup.site_packages.display(), setup.app_dir.display());
    if let Some(existing) = existing.filter(|p| !p.is_empty()) {
        path.push(':');
        path.push_str(existing);
    }
    path
}

/// Start the supervisor and block until the worker group terminates
pub(crate) async fn run_supervisor(
    ctx: &UiContext,
    config: &Config,
    launch: LaunchConfig,
    setup: WorkerSetup,
    image: Option<&str>,
) -> SlipwayResult<()> {
    let journal = Journal::new(config);

    let search_path = python_path(&setup, setup.env.get("PYTHONPATH").map(String::as_str));
    let mut env = setup.env;
    env.insert("PYTHONPATH".to_string(), search_path);

    let runtime = &launch.runtime;
    let spec = if runtime.command.is_empty() {
        WorkerSpec::gateway(&runtime.interpreter, setup.app_dir.clone())
    } else {
        WorkerSpec::new(runtime.command.clone(), setup.app_dir.clone())
    }
    .with_env(env);

    let resolver = ModuleResolver::new(vec![setup.app_dir.clone(), setup.site_packages.clone()]);
    let mut supervisor = Supervisor::new(launch.clone(), spec, Box::new(resolver))
        .grace_period(launch.runtime.grace);

    supervisor.start()?;
    let addr = supervisor
        .local_addr()
        .unwrap_or_else(|| launch.socket_addr());

    ui::step_ok_detail(
        ctx,
        &format!("Serving {}", launch.entry_point),
        &format!("http://{}", addr),
    );
    ui::key_value(ctx, "Workers", &launch.worker_count.to_string());
    ui::remark(ctx, "Press Ctrl-C to stop");

    journal
        .record(
            "launch.started",
            &json!({
                "image": image,
                "entry_point": launch.entry_point.to_string(),
                "address": addr.to_string(),
                "workers": launch.worker_count,
                "pids": supervisor.worker_pids(),
            }),
        )
        .await;

    let result = supervisor.wait(shutdown_signal()).await;

    let outcome = match &result {
        Ok(summary) => json!({
            "image": image,
            "stopped": summary.stopped,
            "exits": summary.exits.iter().map(|e| json!({
                "worker": e.index,
                "pid": e.pid,
                "code": e.code,
                "signal": e.signal,
            })).collect::<Vec<_>>(),
        }),
        Err(e) => json!({ "image": image, "error": e.to_string() }),
    };
    journal.record("launch.terminated", &outcome).await;

    match result {
        Ok(summary) if summary.stopped => {
            ui::outro_success(ctx, "Stopped");
            Ok(())
        }
        Ok(_) => {
            ui::outro_success(ctx, "All workers exited");
            Ok(())
        }
        Err(e) => {
            ui::outro_error(ctx, "Workers exited uncleanly");
            Err(e)
        }
    }
}
