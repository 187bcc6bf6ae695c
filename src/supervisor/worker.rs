//! Worker process spawning
//!
//! A worker command is a template rendered per entry point. Placeholders:
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `{entry_point}` | `module:callable` |
//! | `{module}` | dotted module path |
//! | `{callable}` | callable name |
//! | `{fd}` | inherited listening fd |
//! | `{bootstrap}` | source of the built-in WSGI gateway worker |

use crate::error::{SlipwayError, SlipwayResult};
use crate::supervisor::socket::{install_listen_fd, SharedListener, LISTEN_FD};
use crate::supervisor::EntryPoint;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

/// Built-in gateway worker, run as `<interpreter> -c <bootstrap> <entry_point>`
pub const GATEWAY_BOOTSTRAP: &str = include_str!("gateway_worker.py");

/// How to start one worker process
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    template: Vec<String>,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
    clear_env: bool,
}

impl WorkerSpec {
    pub fn new(template: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            template,
            cwd: cwd.into(),
            env: BTreeMap::new(),
            clear_env: false,
        }
    }

    /// The built-in gateway worker under `interpreter`
    pub fn gateway(interpreter: &str, cwd: impl Into<PathBuf>) -> Self {
        Self::new(
            vec![
                interpreter.to_string(),
                "-c".to_string(),
                "{bootstrap}".to_string(),
                "{entry_point}".to_string(),
            ],
            cwd,
        )
    }

    /// Environment added on top of the supervisor's own
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    /// Start workers with only the configured environment
    pub fn clear_env(mut self, clear: bool) -> Self {
        self.clear_env = clear;
        self
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn render(&self, entry_point: &EntryPoint) -> Vec<String> {
        self.template
            .iter()
            .map(|arg| {
                arg.replace("{bootstrap}", GATEWAY_BOOTSTRAP)
                    .replace("{entry_point}", &entry_point.to_string())
                    .replace("{module}", entry_point.module())
                    .replace("{callable}", entry_point.callable())
                    .replace("{fd}", &LISTEN_FD.to_string())
            })
            .collect()
    }

    /// Spawn worker `index` with the listener at fd 3
    pub fn spawn(
        &self,
        index: usize,
        entry_point: &EntryPoint,
        listener: &SharedListener,
    ) -> SlipwayResult<Child> {
        let argv = self.render(entry_point);
        let (program, args) = argv.split_first().ok_or_else(|| SlipwayError::WorkerSpawn {
            index,
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty worker command"),
        })?;
        debug!("Spawning worker {}: {}", index, program);

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if self.clear_env {
            command.env_clear();
        }
        command
            .envs(&self.env)
            .env("LISTEN_FDS", "1")
            .env("SLIPWAY_LISTEN_FD", LISTEN_FD.to_string())
            .env("SLIPWAY_WORKER", index.to_string())
            .env("SLIPWAY_ENTRY_POINT", entry_point.to_string())
            .env("SLIPWAY_BIND", listener.local_addr().to_string())
            .env("PYTHONUNBUFFERED", "1");

        let fd = listener.raw_fd();
        // SAFETY: install_listen_fd only calls async-signal-safe libc functions
        unsafe {
            command.pre_exec(move || install_listen_fd(fd));
        }

        command
            .spawn()
            .map_err(|e| SlipwayError::WorkerSpawn { index, source: e })
    }
}
