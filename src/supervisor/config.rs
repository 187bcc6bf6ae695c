//! Launch configuration
//!
//! The image's start command is a `slipway supervise` invocation, so the
//! launch contract is carried in the image itself and parsed back into a
//! [`LaunchConfig`] at launch time. That includes how workers are started:
//! a start command that records `--interpreter` is complete, and the local
//! `[launch]` table only fills in what older start commands left out.

use crate::cli::args::{Cli, Commands, SuperviseArgs};
use crate::config::schema::LaunchSettings;
use crate::error::{SlipwayError, SlipwayResult};
use crate::supervisor::EntryPoint;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Upper bound on workers per supervisor
pub const MAX_WORKERS: usize = 256;

/// How each worker process is started and stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRuntime {
    /// Interpreter for the built-in gateway worker
    pub interpreter: String,
    /// Custom worker command template; empty runs the built-in worker
    pub command: Vec<String>,
    /// Time workers get to exit after SIGTERM
    pub grace: Duration,
}

impl WorkerRuntime {
    pub fn from_settings(settings: &LaunchSettings) -> Self {
        Self {
            interpreter: settings.interpreter.clone(),
            command: settings.worker_command.clone(),
            grace: Duration::from_secs(settings.grace_secs),
        }
    }

    /// Values from `supervise` flags, with `fallback` for unset ones
    pub fn from_args(args: &SuperviseArgs, fallback: &LaunchSettings) -> Self {
        let command = if args.interpreter.is_none() && args.worker_command.is_empty() {
            fallback.worker_command.clone()
        } else {
            args.worker_command.clone()
        };
        Self {
            interpreter: args
                .interpreter
                .clone()
                .unwrap_or_else(|| fallback.interpreter.clone()),
            command,
            grace: Duration::from_secs(args.grace_secs.unwrap_or(fallback.grace_secs)),
        }
    }
}

impl Default for WorkerRuntime {
    fn default() -> Self {
        Self::from_settings(&LaunchSettings::default())
    }
}

/// Everything the supervisor needs to start the process group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub entry_point: EntryPoint,
    pub bind_address: IpAddr,
    /// 0 binds an ephemeral port
    pub port: u16,
    pub worker_count: usize,
    pub runtime: WorkerRuntime,
}

impl LaunchConfig {
    pub fn new(
        entry_point: EntryPoint,
        bind: SocketAddr,
        worker_count: usize,
    ) -> SlipwayResult<Self> {
        let config = Self {
            entry_point,
            bind_address: bind.ip(),
            port: bind.port(),
            worker_count,
            runtime: WorkerRuntime::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_runtime(mut self, runtime: WorkerRuntime) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn validate(&self) -> SlipwayResult<()> {
        if self.worker_count == 0 {
            return Err(SlipwayError::LaunchInvalid(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.worker_count > MAX_WORKERS {
            return Err(SlipwayError::LaunchInvalid(format!(
                "worker count {} exceeds the maximum of {}",
                self.worker_count, MAX_WORKERS
            )));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Parse `host:port` where host is an IP address
    pub fn parse_bind(s: &str) -> SlipwayResult<SocketAddr> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(addr);
        }
        let reason = if s.parse::<IpAddr>().is_ok() {
            format!("bind address '{}' has no port", s)
        } else {
            format!("bind address '{}' is not IP:PORT", s)
        };
        Err(SlipwayError::LaunchInvalid(reason))
    }

    /// Build from parsed `supervise` arguments, taking unset worker
    /// runtime values from `fallback`
    pub fn from_args(args: &SuperviseArgs, fallback: &LaunchSettings) -> SlipwayResult<Self> {
        Ok(Self::new(
            EntryPoint::parse(&args.entry_point)?,
            Self::parse_bind(&args.bind)?,
            args.workers,
        )?
        .with_runtime(WorkerRuntime::from_args(args, fallback)))
    }

    /// Build from the `[launch]` table, falling back to `default_port`
    pub fn from_settings(settings: &LaunchSettings, default_port: u16) -> SlipwayResult<Self> {
        let ip: IpAddr = settings.bind.parse().map_err(|_| {
            SlipwayError::LaunchInvalid(format!("launch.bind '{}' is not an IP address", settings.bind))
        })?;
        Ok(Self::new(
            EntryPoint::parse(&settings.entry_point)?,
            SocketAddr::new(ip, settings.port.unwrap_or(default_port)),
            settings.workers,
        )?
        .with_runtime(WorkerRuntime::from_settings(settings)))
    }

    /// Parse an image start command back into a launch configuration
    pub fn from_entrypoint(argv: &[String], fallback: &LaunchSettings) -> SlipwayResult<Self> {
        let cli = Cli::try_parse_from(argv).map_err(|e| {
            SlipwayError::LaunchInvalid(format!(
                "image entrypoint {:?} is not a supervise command: {}",
                argv,
                e.kind()
            ))
        })?;
        match cli.command {
            Commands::Supervise(args) => Self::from_args(&args, fallback),
            _ => Err(SlipwayError::LaunchInvalid(format!(
                "image entrypoint {:?} is not a supervise command",
                argv
            ))),
        }
    }

    /// Start command recorded in the image
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "slipway".to_string(),
            "supervise".to_string(),
            "--workers".to_string(),
            self.worker_count.to_string(),
            "--bind".to_string(),
            self.socket_addr().to_string(),
            "--interpreter".to_string(),
            self.runtime.interpreter.clone(),
            "--grace-secs".to_string(),
            self.runtime.grace.as_secs().to_string(),
            self.entry_point.to_string(),
        ];
        if !self.runtime.command.is_empty() {
            args.push("--".to_string());
            args.extend(self.runtime.command.iter().cloned());
        }
        args
    }
}
