//! Error types for slipway
//!
//! All modules use `SlipwayResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for slipway operations
pub type SlipwayResult<T> = Result<T, SlipwayError>;

/// Exit code for generic failures
pub const EXIT_FAILURE: u8 = 1;
/// Exit code for build pipeline failures
pub const EXIT_BUILD_FAILED: u8 = 2;
/// Exit code when the application entry point cannot be resolved
pub const EXIT_ENTRY_POINT: u8 = 3;

/// All errors that can occur in slipway
#[derive(Error, Debug)]
pub enum SlipwayError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Build errors
    #[error("Base image unresolvable: {reference}: {reason}")]
    BaseUnresolvable { reference: String, reason: String },

    #[error("Base reference is not pinned to an exact version: {0}")]
    BaseNotPinned(String),

    #[error("Dependency installation failed: {reason}")]
    DependencyInstall { reason: String },

    #[error("Manifest parse error at line {line}: {reason}")]
    ManifestParse { line: usize, reason: String },

    #[error("Build step {step} is out of order: {reason}")]
    BuildOrder { step: String, reason: String },

    #[error("Build input not found: {0}")]
    BuildInputMissing(PathBuf),

    // Store errors
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Image reference is ambiguous: {0}")]
    ImageAmbiguous(String),

    #[error("Layer not found in store: {0}")]
    LayerNotFound(String),

    #[error("Corrupt store record {path}: {reason}")]
    StoreCorrupt { path: PathBuf, reason: String },

    // Launch errors
    #[error("Entry point unresolvable: {entry_point}: {reason}")]
    EntryPointUnresolvable { entry_point: String, reason: String },

    #[error("Invalid entry point '{0}': expected module:callable")]
    EntryPointInvalid(String),

    #[error("Invalid launch configuration: {0}")]
    LaunchInvalid(String),

    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn worker {index}: {source}")]
    WorkerSpawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Supervisor is already {0}")]
    SupervisorState(String),

    #[error("Workers exited uncleanly (exit code {code})")]
    WorkersFailed { code: i32 },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("Invalid path: {path}: {reason}")]
    PathInvalid { path: PathBuf, reason: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl SlipwayError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a dependency installation error
    pub fn install(reason: impl Into<String>) -> Self {
        Self::DependencyInstall {
            reason: reason.into(),
        }
    }

    /// Whether the error aborted an image build
    pub fn is_build_failure(&self) -> bool {
        matches!(
            self,
            Self::BaseUnresolvable { .. }
                | Self::BaseNotPinned(_)
                | Self::DependencyInstall { .. }
                | Self::ManifestParse { .. }
                | Self::BuildOrder { .. }
                | Self::BuildInputMissing(_)
        )
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::EntryPointUnresolvable { .. } | Self::EntryPointInvalid(_) => EXIT_ENTRY_POINT,
            Self::WorkersFailed { code } => u8::try_from(*code)
                .ok()
                .filter(|c| *c != 0)
                .unwrap_or(EXIT_FAILURE),
            e if e.is_build_failure() => EXIT_BUILD_FAILED,
            _ => EXIT_FAILURE,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::BaseNotPinned(_) => {
                Some("Pin the base to a concrete version tag or an @sha256: digest")
            }
            Self::BaseUnresolvable { .. } => {
                Some("Add the reference to the [bases] table of your config")
            }
            Self::BuildOrder { .. } => {
                Some("Layers must be ordered: base, workdir, manifest, install, source")
            }
            Self::EntryPointInvalid(_) => Some("Use the form module:callable, e.g. app:flask_app"),
            Self::ImageNotFound(_) => Some("Run: slipway images"),
            _ => None,
        }
    }
}
