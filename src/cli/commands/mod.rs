//! CLI command implementations

pub mod build;
pub mod cache;
pub mod config;
pub mod images;
pub mod init;
pub mod inspect;
pub mod launch;
pub mod run;
pub mod supervise;

pub use build::execute as build;
pub use cache::execute as cache;
pub use config::execute as config;
pub use images::execute as images;
pub use init::execute as init;
pub use inspect::execute as inspect;
pub use launch::execute as launch;
pub use run::execute as run;
pub use supervise::execute as supervise;

use crate::config::{Config, ConfigManager};
use crate::error::{SlipwayError, SlipwayResult};
use crate::layer::LayerStore;
use std::path::{Path, PathBuf};

/// Open the layer store configured in `[store]`
pub(crate) async fn open_store(config: &Config) -> SlipwayResult<LayerStore> {
    let root = config
        .store
        .path
        .clone()
        .unwrap_or_else(ConfigManager::default_store_dir);
    LayerStore::open(root).await
}

/// Absolute project directory, defaulting to the current directory
pub(crate) async fn project_dir(arg: Option<&Path>) -> SlipwayResult<PathBuf> {
    let dir = match arg {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()
            .map_err(|e| SlipwayError::io("getting current directory", e))?,
    };
    tokio::fs::canonicalize(&dir)
        .await
        .map_err(|_| SlipwayError::PathNotFound(dir))
}

/// Human-readable byte count
pub(crate) fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
