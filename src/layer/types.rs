//! Layer records

use crate::layer::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed kinds of layer an image is assembled from, in build order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Pinned base runtime filesystem
    Base,
    /// Working directory creation
    Workdir,
    /// Dependency manifest copied alone
    CopyManifest,
    /// Installed dependencies
    InstallDependencies,
    /// Remaining application source
    CopySource,
}

impl LayerKind {
    /// All kinds in their mandatory order
    pub const ORDER: [LayerKind; 5] = [
        LayerKind::Base,
        LayerKind::Workdir,
        LayerKind::CopyManifest,
        LayerKind::InstallDependencies,
        LayerKind::CopySource,
    ];

    /// Stable identifier used in fingerprints and records
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "base",
            Self::Workdir => "workdir",
            Self::CopyManifest => "copy_manifest",
            Self::InstallDependencies => "install_dependencies",
            Self::CopySource => "copy_source",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a layer was reused from the store or built fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hit => write!(f, "cached"),
            Self::Miss => write!(f, "built"),
        }
    }
}

/// An immutable filesystem delta on top of its parent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    /// What step produced this layer
    pub kind: LayerKind,

    /// Content-addressed identity
    pub fingerprint: Fingerprint,

    /// Fingerprint of the predecessor, `None` for the base
    pub parent: Option<Fingerprint>,

    /// Human-readable description of the step
    pub description: String,

    /// Size of the delta in bytes
    pub size_bytes: u64,

    /// When the delta was committed
    pub created_at: DateTime<Utc>,

    /// Outcome in the build that produced the enclosing image
    pub outcome: CacheOutcome,
}

impl Layer {
    /// Same layer, reported with a different build outcome
    pub fn with_outcome(mut self, outcome: CacheOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}
