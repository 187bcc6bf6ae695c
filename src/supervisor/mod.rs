//! Process supervision
//!
//! One supervisor process owns the listening socket and a fixed number of
//! worker processes that all accept from it:
//! - `entry_point`: `module:callable` parsing and pre-bind resolution
//! - `socket`: the shared listener and its fd hand-off
//! - `worker`: worker command templates and spawning
//! - `supervisor`: lifecycle, signal forwarding and exit reporting

mod config;
pub mod env_file;
mod entry_point;
mod socket;
#[allow(clippy::module_inception)]
mod supervisor;
mod worker;

pub use config::{LaunchConfig, WorkerRuntime, MAX_WORKERS};
pub use entry_point::{EntryPoint, EntryPointResolver, ModuleResolver, ResolvedEntryPoint};
pub use socket::{SharedListener, LISTEN_FD};
pub use supervisor::{
    shutdown_signal, ExitSummary, Supervisor, SupervisorState, WorkerExit, DEFAULT_GRACE,
};
pub use worker::{WorkerSpec, GATEWAY_BOOTSTRAP};
