//! Installer abstraction
//!
//! Lets the image builder install dependencies without knowing which
//! backend resolves them.

use crate::build::manifest::DependencyManifest;
use crate::error::SlipwayResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A package present in the install layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

/// Abstract dependency installer
#[async_trait]
pub trait DependencyInstaller: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &'static str;

    /// Installer identity folded into the install layer fingerprint.
    ///
    /// Two installers with the same key must produce the same layer for
    /// the same manifest.
    fn cache_key(&self) -> String;

    /// Install every requirement of `manifest` into `target`.
    ///
    /// `manifest_path` is the copied manifest file; `scratch` is a directory
    /// discarded after the step, usable for caches and temp files. On error
    /// the caller discards `target` entirely.
    async fn install(
        &self,
        manifest_path: &Path,
        manifest: &DependencyManifest,
        target: &Path,
        scratch: &Path,
    ) -> SlipwayResult<Vec<InstalledPackage>>;
}
