//! Local package index installer
//!
//! The index is a directory tree `<index>/<name>/<version>/`, where each
//! version directory holds the files that land in site-packages.

use crate::build::install::{DependencyInstaller, InstalledPackage};
use crate::build::manifest::{parse_version, DependencyManifest, Requirement};
use crate::error::{SlipwayError, SlipwayResult};
use crate::layer::tree::{copy_tree, run_blocking};
use async_trait::async_trait;
use semver::Version;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Installs from a local package index directory
#[derive(Debug, Clone)]
pub struct IndexInstaller {
    index: PathBuf,
}

impl IndexInstaller {
    pub fn new(index: impl Into<PathBuf>) -> Self {
        Self {
            index: index.into(),
        }
    }

    /// Highest version of `requirement` present in the index
    fn select(&self, requirement: &Requirement) -> SlipwayResult<(Version, PathBuf)> {
        let package_dir = self.index.join(&requirement.name);
        let entries = std::fs::read_dir(&package_dir).map_err(|_| {
            SlipwayError::install(format!("no package named '{}' in the index", requirement.name))
        })?;

        let mut available = vec![];
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let raw = entry.file_name().to_string_lossy().to_string();
            match parse_version(&raw) {
                Ok((version, _)) => available.push((version, entry.path())),
                Err(e) => debug!("Ignoring index entry {}/{}: {}", requirement.name, raw, e),
            }
        }
        available.sort_by(|a, b| a.0.cmp(&b.0));

        let listed: Vec<String> = available.iter().map(|(v, _)| v.to_string()).collect();
        available
            .into_iter()
            .rev()
            .find(|(version, _)| requirement.matches(version))
            .ok_or_else(|| {
                SlipwayError::install(format!(
                    "no version of '{}' satisfies '{}' (available: {})",
                    requirement.name,
                    requirement.constraint_str(),
                    if listed.is_empty() {
                        "none".to_string()
                    } else {
                        listed.join(", ")
                    }
                ))
            })
    }
}

#[async_trait]
impl DependencyInstaller for IndexInstaller {
    fn name(&self) -> &'static str {
        "index"
    }

    fn cache_key(&self) -> String {
        format!("index:{}", self.index.display())
    }

    async fn install(
        &self,
        _manifest_path: &Path,
        manifest: &DependencyManifest,
        target: &Path,
        _scratch: &Path,
    ) -> SlipwayResult<Vec<InstalledPackage>> {
        if manifest.is_empty() {
            return Ok(vec![]);
        }
        if !self.index.is_dir() {
            return Err(SlipwayError::install(format!(
                "package index unreachable: {}",
                self.index.display()
            )));
        }

        // Resolve everything before copying anything
        let mut selected = Vec::with_capacity(manifest.requirements.len());
        for requirement in &manifest.requirements {
            let (version, dir) = self.select(requirement)?;
            debug!("Resolved {} to {}", requirement, version);
            selected.push((requirement.name.clone(), version, dir));
        }

        let target = target.to_path_buf();
        let packages = run_blocking(move || {
            let mut packages = vec![];
            for (name, version, dir) in selected {
                copy_tree(&dir, &target, &[])?;

                let dist_info = target.join(format!("{}-{}.dist-info", name.replace('-', "_"), version));
                std::fs::create_dir_all(&dist_info)
                    .map_err(|e| SlipwayError::io(format!("creating {}", dist_info.display()), e))?;
                std::fs::write(
                    dist_info.join("METADATA"),
                    format!("Metadata-Version: 2.1\nName: {}\nVersion: {}\n", name, version),
                )
                .map_err(|e| SlipwayError::io("writing package metadata", e))?;

                packages.push(InstalledPackage {
                    name,
                    version: version.to_string(),
                });
            }
            Ok(packages)
        })
        .await?;

        info!("Installed {} packages from index", packages.len());
        Ok(packages)
    }
}
