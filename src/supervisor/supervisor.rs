//! Pre-fork supervisor
//!
//! Lifecycle: `NotStarted -> Running -> Terminated`. Starting resolves the
//! entry point, binds the shared listener and spawns the fixed number of
//! workers. The supervisor then waits until every worker has exited or a
//! stop signal arrives. Crashed workers are reported, never restarted.
//!
//! Each worker is owned by one task that both reaps it and delivers the
//! signals the supervisor asks for, so a signal never reaches a pid that
//! has already been reaped.

use crate::error::{SlipwayError, SlipwayResult};
use crate::supervisor::{EntryPointResolver, LaunchConfig, SharedListener, WorkerSpec};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::os::unix::process::ExitStatusExt;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default time workers get to exit after SIGTERM
pub const DEFAULT_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Running,
    Terminated,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not started",
            Self::Running => "running",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// How one worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub index: usize,
    pub pid: u32,
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "worker {} (pid {}) exited with code {}", self.index, self.pid, code),
            (None, Some(signal)) => write!(f, "worker {} (pid {}) killed by signal {}", self.index, self.pid, signal),
            (None, None) => write!(f, "worker {} (pid {}) exited", self.index, self.pid),
        }
    }
}

/// Result of a supervised run that ended cleanly
#[derive(Debug, Clone)]
pub struct ExitSummary {
    pub exits: Vec<WorkerExit>,
    /// Whether a stop signal ended the run
    pub stopped: bool,
}

/// Supervisor side of a running worker
struct WorkerHandle {
    pid: u32,
    signals: mpsc::UnboundedSender<libc::c_int>,
}

/// Owns the listening socket and the worker processes
pub struct Supervisor {
    config: LaunchConfig,
    spec: WorkerSpec,
    resolver: Box<dyn EntryPointResolver>,
    grace: Duration,
    state: SupervisorState,
    listener: Option<SharedListener>,
    workers: BTreeMap<usize, WorkerHandle>,
    exits: Option<mpsc::UnboundedReceiver<WorkerExit>>,
}

impl Supervisor {
    pub fn new(config: LaunchConfig, spec: WorkerSpec, resolver: Box<dyn EntryPointResolver>) -> Self {
        Self {
            config,
            spec,
            resolver,
            grace: DEFAULT_GRACE,
            state: SupervisorState::NotStarted,
            listener: None,
            workers: BTreeMap::new(),
            exits: None,
        }
    }

    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// Bound address once running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|l| l.local_addr())
    }

    /// Supervisor-side descriptor of the shared listener
    pub fn listener_fd(&self) -> Option<RawFd> {
        self.listener.as_ref().map(|l| l.raw_fd())
    }

    /// Pids of workers that have not exited yet
    pub fn worker_pids(&self) -> Vec<u32> {
        self.workers.values().map(|w| w.pid).collect()
    }

    /// Resolve the entry point, bind, and spawn every worker
    pub fn start(&mut self) -> SlipwayResult<()> {
        if self.state != SupervisorState::NotStarted {
            return Err(SlipwayError::SupervisorState(self.state.to_string()));
        }
        self.config.validate()?;

        // Nothing is bound until the entry point is known to exist
        let resolved = self.resolver.resolve(&self.config.entry_point)?;
        debug!("Serving {} from {}", resolved.entry_point, resolved.module_file.display());

        let listener = SharedListener::bind(self.config.socket_addr())?;
        let (tx, rx) = mpsc::unbounded_channel();

        for index in 0..self.config.worker_count {
            let child = match self.spec.spawn(index, &self.config.entry_point, &listener) {
                Ok(child) => child,
                Err(e) => {
                    self.signal_all(libc::SIGKILL);
                    self.state = SupervisorState::Terminated;
                    return Err(e);
                }
            };
            let pid = child.id().unwrap_or_default();
            let (signal_tx, signal_rx) = mpsc::unbounded_channel();
            self.workers.insert(
                index,
                WorkerHandle {
                    pid,
                    signals: signal_tx,
                },
            );
            tokio::spawn(watch_worker(child, index, pid, signal_rx, tx.clone()));
        }

        info!(
            "Started {} workers for {} on {}",
            self.config.worker_count,
            self.config.entry_point,
            listener.local_addr()
        );
        self.listener = Some(listener);
        self.exits = Some(rx);
        self.state = SupervisorState::Running;
        Ok(())
    }

    fn signal_all(&self, signal: libc::c_int) {
        for (index, worker) in &self.workers {
            debug!("Signalling worker {} (pid {}) with {}", index, worker.pid, signal);
            let _ = worker.signals.send(signal);
        }
    }

    /// Wait until all workers exit, stopping them when `shutdown` resolves.
    ///
    /// A run ended by `shutdown` is clean. A run that ends because workers
    /// exited on their own fails with the first non-zero worker exit code.
    pub async fn wait<F>(&mut self, shutdown: F) -> SlipwayResult<ExitSummary>
    where
        F: Future<Output = ()>,
    {
        if self.state != SupervisorState::Running {
            return Err(SlipwayError::SupervisorState(self.state.to_string()));
        }
        let mut rx = self
            .exits
            .take()
            .ok_or_else(|| SlipwayError::Internal("worker exit channel missing".to_string()))?;

        tokio::pin!(shutdown);
        let mut stopped = false;
        let mut kill_at: Option<Instant> = None;
        let mut exits = vec![];

        while !self.workers.is_empty() {
            tokio::select! {
                exit = rx.recv() => {
                    let Some(exit) = exit else { break };
                    self.workers.remove(&exit.index);
                    if stopped || exit.success() {
                        info!("{}", exit);
                    } else {
                        warn!("{}; not restarting, {} workers remain", exit, self.workers.len());
                    }
                    exits.push(exit);
                }
                _ = &mut shutdown, if !stopped => {
                    info!("Stopping {} workers", self.workers.len());
                    stopped = true;
                    self.signal_all(libc::SIGTERM);
                    kill_at = Some(Instant::now() + self.grace);
                }
                _ = sleep_until(kill_at) => {
                    warn!("{} workers ignored SIGTERM, killing", self.workers.len());
                    self.signal_all(libc::SIGKILL);
                    kill_at = None;
                }
            }
        }

        self.listener = None;
        self.state = SupervisorState::Terminated;

        if !stopped {
            if let Some(failed) = exits.iter().find(|e| !e.success()) {
                return Err(SlipwayError::WorkersFailed {
                    code: failed.code.unwrap_or(1),
                });
            }
        }
        Ok(ExitSummary { exits, stopped })
    }

    /// Start, then run until every worker exits or SIGINT/SIGTERM arrives
    pub async fn launch(mut self) -> SlipwayResult<ExitSummary> {
        self.start()?;
        self.wait(shutdown_signal()).await
    }
}

/// Reap one worker, delivering requested signals until it exits
async fn watch_worker(
    mut child: Child,
    index: usize,
    pid: u32,
    mut signals: mpsc::UnboundedReceiver<libc::c_int>,
    exits: mpsc::UnboundedSender<WorkerExit>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(signal) = signals.recv() => {
                signal_child(&child, signal);
            }
        }
    };
    let (code, signal) = match status {
        Ok(status) => (status.code(), status.signal()),
        Err(e) => {
            warn!("Waiting on worker {} failed: {}", index, e);
            (None, None)
        }
    };
    let _ = exits.send(WorkerExit {
        index,
        pid,
        code,
        signal,
    });
}

/// Send `signal` to `child` unless it has been reaped. Returns whether a
/// signal was sent.
fn signal_child(child: &Child, signal: libc::c_int) -> bool {
    let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
        return false;
    };
    // SAFETY: kill(2) on a child this task owns and has not reaped
    unsafe { libc::kill(pid, signal) == 0 }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            let _ = ctrl_c.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{EntryPoint, ModuleResolver};
    use tempfile::TempDir;

    fn app_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app.py"), "flask_app = object()\n").unwrap();
        dir
    }

    fn supervisor(dir: &TempDir, entry_point: &str, workers: usize, script: &str) -> Supervisor {
        let config = LaunchConfig::new(
            EntryPoint::parse(entry_point).unwrap(),
            "127.0.0.1:0".parse().unwrap(),
            workers,
        )
        .unwrap();
        let spec = WorkerSpec::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            dir.path(),
        );
        Supervisor::new(
            config,
            spec,
            Box::new(ModuleResolver::new(vec![dir.path().to_path_buf()])),
        )
        .grace_period(Duration::from_secs(2))
    }

    #[cfg(target_os = "linux")]
    fn socket_inode(path: &str) -> String {
        std::fs::read_link(path).unwrap().to_string_lossy().to_string()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn workers_share_one_listener() {
        let dir = app_dir();
        let mut sup = supervisor(&dir, "app:flask_app", 3, "exec sleep 30");

        sup.start().unwrap();

        assert_eq!(sup.state(), SupervisorState::Running);
        let pids = sup.worker_pids();
        assert_eq!(pids.len(), 3);

        let listener = socket_inode(&format!("/proc/self/fd/{}", sup.listener_fd().unwrap()));
        assert!(listener.starts_with("socket:"));
        for pid in &pids {
            assert_eq!(socket_inode(&format!("/proc/{pid}/fd/3")), listener);
        }

        let summary = sup.wait(async {}).await.unwrap();
        assert!(summary.stopped);
        assert_eq!(summary.exits.len(), 3);
        assert_eq!(sup.state(), SupervisorState::Terminated);
    }

    #[tokio::test]
    async fn unresolvable_entry_point_binds_nothing() {
        let dir = app_dir();
        let mut sup = supervisor(&dir, "app:missing", 2, "exit 0");

        let err = sup.start().unwrap_err();

        assert!(matches!(err, SlipwayError::EntryPointUnresolvable { .. }));
        assert!(sup.local_addr().is_none());
        assert!(sup.worker_pids().is_empty());
        assert_eq!(sup.state(), SupervisorState::NotStarted);
    }

    #[tokio::test]
    async fn cannot_start_twice() {
        let dir = app_dir();
        let mut sup = supervisor(&dir, "app:flask_app", 1, "exit 0");
        sup.start().unwrap();
        assert!(matches!(sup.start(), Err(SlipwayError::SupervisorState(_))));
        sup.wait(std::future::pending()).await.unwrap();
    }

    #[tokio::test]
    async fn clean_worker_exit_is_success() {
        let dir = app_dir();
        let summary = supervisor(&dir, "app:flask_app", 2, "exit 0")
            .launch()
            .await
            .unwrap();

        assert!(!summary.stopped);
        assert_eq!(summary.exits.len(), 2);
        assert!(summary.exits.iter().all(WorkerExit::success));
    }

    #[tokio::test]
    async fn crashed_worker_is_not_restarted() {
        let dir = app_dir();
        let mut sup = supervisor(
            &dir,
            "app:flask_app",
            2,
            "if [ \"$SLIPWAY_WORKER\" = 0 ]; then exit 3; fi; exit 0",
        );
        sup.start().unwrap();

        let err = sup.wait(std::future::pending()).await.unwrap_err();

        assert!(matches!(err, SlipwayError::WorkersFailed { code: 3 }));
        assert_eq!(err.exit_code(), 3);
        assert_eq!(sup.state(), SupervisorState::Terminated);
    }

    #[tokio::test]
    async fn reaped_child_is_never_signalled() {
        let mut child = tokio::process::Command::new("true").spawn().unwrap();
        assert!(signal_child(&child, 0));

        child.wait().await.unwrap();

        assert!(child.id().is_none());
        assert!(!signal_child(&child, libc::SIGTERM));
    }

    #[tokio::test]
    async fn stop_after_partial_exit_signals_survivors_only() {
        let dir = app_dir();
        let mut sup = supervisor(
            &dir,
            "app:flask_app",
            2,
            "if [ \"$SLIPWAY_WORKER\" = 0 ]; then exit 0; fi; exec sleep 30",
        );
        sup.start().unwrap();

        let shutdown = tokio::time::sleep(Duration::from_millis(500));
        let summary = tokio::time::timeout(Duration::from_secs(10), sup.wait(shutdown))
            .await
            .unwrap()
            .unwrap();

        assert!(summary.stopped);
        assert_eq!(summary.exits.len(), 2);
        let first = summary.exits.iter().find(|e| e.index == 0).unwrap();
        let second = summary.exits.iter().find(|e| e.index == 1).unwrap();
        assert_eq!(first.code, Some(0));
        assert_eq!(second.signal, Some(libc::SIGTERM));
        assert!(sup.worker_pids().is_empty());
    }

    #[tokio::test]
    async fn stubborn_workers_are_killed_after_grace() {
        let dir = app_dir();
        let mut sup = supervisor(&dir, "app:flask_app", 1, "trap '' TERM; while true; do sleep 1; done")
            .grace_period(Duration::from_millis(200));
        sup.start().unwrap();

        let shutdown = tokio::time::sleep(Duration::from_millis(300));
        let summary = tokio::time::timeout(Duration::from_secs(10), sup.wait(shutdown))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(summary.exits[0].signal, Some(libc::SIGKILL));
    }
}
