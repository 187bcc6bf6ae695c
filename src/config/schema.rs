//! Configuration schema for slipway
//!
//! Global configuration lives at `~/.config/slipway/config.toml`; a project
//! `slipway.toml` overrides it table by table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Layer store settings
    pub store: StoreConfig,

    /// Base image catalog: pinned reference -> local rootfs directory
    pub bases: BTreeMap<String, PathBuf>,

    /// Image build inputs
    pub build: BuildConfig,

    /// Dependency installation backend
    pub install: InstallConfig,

    /// Supervisor launch settings
    pub launch: LaunchSettings,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Append build and launch events to the journal
    pub journal: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            journal: true,
        }
    }
}

/// Layer store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store root (defaults to the slipway state directory)
    pub path: Option<PathBuf>,
}

/// Image build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Pinned base runtime reference
    pub base: Option<String>,

    /// Working directory inside the image
    pub workdir: String,

    /// Dependency manifest, relative to the project directory
    pub manifest: PathBuf,

    /// Application source tree, relative to the project directory
    pub source: PathBuf,

    /// File and directory names excluded from the source copy
    pub ignore: Vec<String>,

    /// Port the application listens on (advisory)
    pub port: u16,

    /// Environment recorded in the image
    pub env: BTreeMap<String, String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            base: None,
            workdir: "/app".to_string(),
            manifest: PathBuf::from("requirements.txt"),
            source: PathBuf::from("."),
            ignore: vec![
                ".git".to_string(),
                "__pycache__".to_string(),
                ".venv".to_string(),
                "target".to_string(),
                ".env".to_string(),
            ],
            port: 8080,
            env: BTreeMap::new(),
        }
    }
}

/// Which installer backend resolves the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallBackend {
    /// Resolve from a local package index directory
    #[default]
    Index,
    /// Run an external installer command
    Command,
}

/// Dependency installation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallConfig {
    /// Installer backend
    pub backend: InstallBackend,

    /// Package index directory (`<index>/<name>/<version>/`)
    pub index: Option<PathBuf>,

    /// Installer command template; `{manifest}` and `{target}` are substituted
    pub command: Vec<String>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            backend: InstallBackend::Index,
            index: None,
            command: vec![
                "pip".to_string(),
                "install".to_string(),
                "--no-cache-dir".to_string(),
                "--target".to_string(),
                "{target}".to_string(),
                "-r".to_string(),
                "{manifest}".to_string(),
            ],
        }
    }
}

/// Supervisor launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchSettings {
    /// Application entry point (`module:callable`)
    pub entry_point: String,

    /// Interface to bind
    pub bind: String,

    /// Port to bind (defaults to the image's declared port)
    pub port: Option<u16>,

    /// Number of worker processes
    pub workers: usize,

    /// Interpreter used by the built-in gateway worker
    pub interpreter: String,

    /// Custom worker command template (overrides the built-in worker)
    pub worker_command: Vec<String>,

    /// dotenv-style file merged into the worker environment
    pub env_file: Option<PathBuf>,

    /// Seconds to wait for workers after SIGTERM before killing them
    pub grace_secs: u64,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            entry_point: "app:app".to_string(),
            bind: "0.0.0.0".to_string(),
            port: None,
            workers: 1,
            interpreter: "python3".to_string(),
            worker_command: vec![],
            env_file: None,
            grace_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[general]"));
        assert!(toml.contains("[build]"));
        assert!(toml.contains("[launch]"));
    }

    #[test]
    fn config_deserializes_empty() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.build.workdir, "/app");
        assert_eq!(config.launch.workers, 1);
        assert_eq!(config.install.backend, InstallBackend::Index);
    }

    #[test]
    fn config_deserializes_partial() {
        let toml = r#"
            [launch]
            workers = 4
            entry_point = "app:flask_app"

            [bases]
            "python:3.12.4-slim" = "/opt/bases/python"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.launch.workers, 4);
        assert_eq!(config.launch.entry_point, "app:flask_app");
        assert_eq!(config.launch.bind, "0.0.0.0"); // default preserved
        assert_eq!(
            config.bases.get("python:3.12.4-slim"),
            Some(&PathBuf::from("/opt/bases/python"))
        );
    }

    #[test]
    fn install_backend_parses_lowercase() {
        let config: Config = toml::from_str("[install]\nbackend = \"command\"").unwrap();
        assert_eq!(config.install.backend, InstallBackend::Command);
    }
}
