//! Base runtime resolution
//!
//! Resolving a base turns a pinned reference into a local root filesystem
//! plus a digest of its contents. The catalog resolver reads the `[bases]`
//! table of the configuration.

use crate::build::BaseReference;
use crate::error::{SlipwayError, SlipwayResult};
use crate::layer::tree::{hash_tree, run_blocking};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A base runtime ready to be copied into the first layer
#[derive(Debug, Clone)]
pub struct ResolvedBase {
    /// Reference as written by the user
    pub reference: BaseReference,
    /// Root filesystem on the host
    pub rootfs: PathBuf,
    /// SHA256 of the root filesystem tree
    pub digest: String,
}

/// Source of base runtime filesystems
#[async_trait]
pub trait BaseResolver: Send + Sync {
    /// Resolve a pinned reference, failing with `BaseUnresolvable`
    async fn resolve(&self, reference: &BaseReference) -> SlipwayResult<ResolvedBase>;
}

/// Resolves bases from a reference -> directory catalog
#[derive(Debug, Clone, Default)]
pub struct CatalogResolver {
    entries: BTreeMap<String, PathBuf>,
}

impl CatalogResolver {
    /// Build a resolver from catalog entries.
    ///
    /// Relative directories are resolved against `relative_to`.
    pub fn new(entries: &BTreeMap<String, PathBuf>, relative_to: &Path) -> Self {
        let entries = entries
            .iter()
            .map(|(reference, dir)| {
                let dir = if dir.is_absolute() {
                    dir.clone()
                } else {
                    relative_to.join(dir)
                };
                (reference.clone(), dir)
            })
            .collect();
        Self { entries }
    }

    fn lookup(&self, reference: &BaseReference) -> Option<&PathBuf> {
        self.entries
            .get(&reference.to_string())
            .or_else(|| self.entries.get(&reference.without_digest()))
    }
}

#[async_trait]
impl BaseResolver for CatalogResolver {
    async fn resolve(&self, reference: &BaseReference) -> SlipwayResult<ResolvedBase> {
        let unresolvable = |reason: String| SlipwayError::BaseUnresolvable {
            reference: reference.to_string(),
            reason,
        };

        let rootfs = self
            .lookup(reference)
            .cloned()
            .ok_or_else(|| unresolvable("not present in the base catalog".to_string()))?;

        if !rootfs.is_dir() {
            return Err(unresolvable(format!(
                "root filesystem {} does not exist",
                rootfs.display()
            )));
        }

        let tree = rootfs.clone();
        let digest = run_blocking(move || hash_tree(&tree, &[])).await?;
        debug!("Base {} digest {}", reference, digest);

        if let Some(pinned) = &reference.digest {
            if *pinned != digest {
                return Err(unresolvable(format!(
                    "digest mismatch: catalog content is sha256:{}",
                    digest
                )));
            }
        }

        Ok(ResolvedBase {
            reference: reference.clone(),
            rootfs,
            digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn catalog(dir: &TempDir) -> CatalogResolver {
        let rootfs = dir.path().join("python-3.12.4");
        std::fs::create_dir_all(rootfs.join("usr").join("bin")).unwrap();
        std::fs::write(rootfs.join("usr").join("bin").join("python3"), "#!runtime").unwrap();

        let mut entries = BTreeMap::new();
        entries.insert("python:3.12.4-slim".to_string(), PathBuf::from("python-3.12.4"));
        CatalogResolver::new(&entries, dir.path())
    }

    #[tokio::test]
    async fn resolves_catalog_entry() {
        let dir = TempDir::new().unwrap();
        let resolver = catalog(&dir);
        let reference = BaseReference::parse("python:3.12.4-slim").unwrap();

        let base = resolver.resolve(&reference).await.unwrap();

        assert_eq!(base.rootfs, dir.path().join("python-3.12.4"));
        assert_eq!(base.digest.len(), 64);
    }

    #[tokio::test]
    async fn unknown_reference_is_unresolvable() {
        let dir = TempDir::new().unwrap();
        let resolver = catalog(&dir);
        let reference = BaseReference::parse("python:3.13.0").unwrap();

        let err = resolver.resolve(&reference).await.unwrap_err();
        assert!(matches!(err, SlipwayError::BaseUnresolvable { .. }));
    }

    #[tokio::test]
    async fn digest_must_match_content() {
        let dir = TempDir::new().unwrap();
        let resolver = catalog(&dir);
        let plain = BaseReference::parse("python:3.12.4-slim").unwrap();
        let digest = resolver.resolve(&plain).await.unwrap().digest;

        let good = BaseReference::parse(&format!("python:3.12.4-slim@sha256:{digest}")).unwrap();
        assert!(resolver.resolve(&good).await.is_ok());

        let bad = BaseReference::parse(&format!("python:3.12.4-slim@sha256:{}", "0".repeat(64)))
            .unwrap();
        let err = resolver.resolve(&bad).await.unwrap_err();
        assert!(err.to_string().contains("digest mismatch"));
    }

    #[tokio::test]
    async fn missing_rootfs_is_unresolvable() {
        let dir = TempDir::new().unwrap();
        let mut entries = BTreeMap::new();
        entries.insert("python:3.12.4".to_string(), PathBuf::from("nowhere"));
        let resolver = CatalogResolver::new(&entries, dir.path());

        let reference = BaseReference::parse("python:3.12.4").unwrap();
        assert!(matches!(
            resolver.resolve(&reference).await,
            Err(SlipwayError::BaseUnresolvable { .. })
        ));
    }
}
