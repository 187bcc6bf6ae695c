//! Layered image construction
//!
//! `ImageBuilder` enforces the layer order at runtime: each step may only
//! run once, right after its predecessor. Every layer step first computes
//! its fingerprint and reuses a committed layer when one exists; otherwise
//! it stages the delta and commits it atomically. A failing step leaves no
//! layer behind and no image is recorded until `set_entrypoint` succeeds.

use crate::build::base::BaseResolver;
use crate::build::install::{DependencyInstaller, DEPS_PREFIX};
use crate::build::manifest::DependencyManifest;
use crate::build::BaseReference;
use crate::error::{SlipwayError, SlipwayResult};
use crate::layer::tree::{copy_file_into, copy_tree, hash_file, hash_tree, image_path, run_blocking};
use crate::layer::{CacheOutcome, Fingerprint, Image, ImageConfig, Layer, LayerKind, LayerStore};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How far the builder has progressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Empty,
    Based,
    Workdir,
    Manifest,
    Installed,
    Source,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "no layers",
            Self::Based => "base selected",
            Self::Workdir => "workdir set",
            Self::Manifest => "manifest copied",
            Self::Installed => "dependencies installed",
            Self::Source => "source copied",
        };
        f.write_str(name)
    }
}

/// The copied manifest, as seen by the install step
#[derive(Debug, Clone)]
struct ManifestInput {
    host_path: PathBuf,
    parsed: DependencyManifest,
}

/// Builds one image, layer by layer
pub struct ImageBuilder {
    store: LayerStore,
    resolver: Box<dyn BaseResolver>,
    installer: Box<dyn DependencyInstaller>,
    no_cache: bool,
    phase: Phase,
    layers: Vec<Layer>,
    base: Option<String>,
    workdir: Option<String>,
    manifest: Option<ManifestInput>,
    exposed_port: Option<u16>,
    env: BTreeMap<String, String>,
}

impl ImageBuilder {
    pub fn new(
        store: LayerStore,
        resolver: Box<dyn BaseResolver>,
        installer: Box<dyn DependencyInstaller>,
    ) -> Self {
        Self {
            store,
            resolver,
            installer,
            no_cache: false,
            phase: Phase::Empty,
            layers: vec![],
            base: None,
            workdir: None,
            manifest: None,
            exposed_port: None,
            env: BTreeMap::new(),
        }
    }

    /// Rebuild every layer even when a cached one exists
    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Layers produced so far, in order
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    fn require(&self, step: LayerKind, expected: Phase) -> SlipwayResult<()> {
        if self.phase == expected {
            return Ok(());
        }
        let reason = if self.phase > expected {
            format!("it must run before the builder reaches '{}'", self.phase)
        } else {
            format!("it needs '{}' but the builder is at '{}'", expected, self.phase)
        };
        Err(SlipwayError::BuildOrder {
            step: step.to_string(),
            reason,
        })
    }

    fn parent(&self) -> Option<&Fingerprint> {
        self.layers.last().map(|l| &l.fingerprint)
    }

    fn workdir(&self) -> &str {
        self.workdir.as_deref().unwrap_or("/")
    }

    /// Cached layer for `fingerprint`, unless caching is disabled
    async fn cached(&self, fingerprint: &Fingerprint) -> SlipwayResult<Option<Layer>> {
        if self.no_cache || !self.store.has_layer(fingerprint) {
            return Ok(None);
        }
        let layer = self.store.load_layer(fingerprint).await?;
        Ok(Some(layer.with_outcome(CacheOutcome::Hit)))
    }

    fn push(&mut self, layer: Layer, next: Phase) -> Layer {
        info!(
            "{} {} ({})",
            layer.kind,
            layer.fingerprint.short(),
            layer.outcome
        );
        self.layers.push(layer.clone());
        self.phase = next;
        layer
    }

    /// Resolve a pinned base runtime and make it the first layer
    pub async fn select_base(&mut self, reference: &str) -> SlipwayResult<Layer> {
        self.require(LayerKind::Base, Phase::Empty)?;

        let reference = BaseReference::parse(reference)?;
        if !reference.is_pinned() {
            return Err(SlipwayError::BaseNotPinned(reference.to_string()));
        }
        let base = self.resolver.resolve(&reference).await?;

        let name = reference.to_string();
        let fingerprint = Fingerprint::chain(
            None,
            LayerKind::Base,
            &[name.as_bytes(), base.digest.as_bytes()],
        );
        self.base = Some(name.clone());

        if let Some(layer) = self.cached(&fingerprint).await? {
            return Ok(self.push(layer, Phase::Based));
        }

        let staging = self.store.stage().await?;
        let (rootfs, diff) = (base.rootfs.clone(), staging.diff());
        run_blocking(move || copy_tree(&rootfs, &diff, &[])).await?;

        let layer = self
            .store
            .commit(staging, LayerKind::Base, fingerprint, None, format!("FROM {}", name))
            .await?;
        Ok(self.push(layer, Phase::Based))
    }

    /// Create the working directory every later step is relative to
    pub async fn set_workdir(&mut self, path: &str) -> SlipwayResult<Layer> {
        self.require(LayerKind::Workdir, Phase::Based)?;
        image_path(Path::new("/"), path)?;

        let parent = self.parent().cloned();
        let fingerprint = Fingerprint::chain(parent.as_ref(), LayerKind::Workdir, &[path.as_bytes()]);
        self.workdir = Some(path.to_string());

        if let Some(layer) = self.cached(&fingerprint).await? {
            return Ok(self.push(layer, Phase::Workdir));
        }

        let staging = self.store.stage().await?;
        let dir = image_path(&staging.diff(), path)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SlipwayError::io(format!("creating workdir {}", path), e))?;

        let layer = self
            .store
            .commit(staging, LayerKind::Workdir, fingerprint, parent, format!("WORKDIR {}", path))
            .await?;
        Ok(self.push(layer, Phase::Workdir))
    }

    /// Copy only the dependency manifest into the working directory
    pub async fn copy_manifest(&mut self, source_path: &Path) -> SlipwayResult<Layer> {
        self.require(LayerKind::CopyManifest, Phase::Workdir)?;
        if !source_path.is_file() {
            return Err(SlipwayError::BuildInputMissing(source_path.to_path_buf()));
        }

        let parsed = DependencyManifest::from_file(source_path).await?;
        let file_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| SlipwayError::BuildInputMissing(source_path.to_path_buf()))?;
        let src = source_path.to_path_buf();
        let sha = run_blocking(move || hash_file(&src)).await?;

        let workdir = self.workdir().to_string();
        let parent = self.parent().cloned();
        let fingerprint = Fingerprint::chain(
            parent.as_ref(),
            LayerKind::CopyManifest,
            &[file_name.as_bytes(), workdir.as_bytes(), sha.as_bytes()],
        );

        let layer = match self.cached(&fingerprint).await? {
            Some(layer) => layer,
            None => {
                let staging = self.store.stage().await?;
                let dest = image_path(&staging.diff(), &workdir)?;
                let src = source_path.to_path_buf();
                run_blocking(move || copy_file_into(&src, &dest)).await?;
                self.store
                    .commit(
                        staging,
                        LayerKind::CopyManifest,
                        fingerprint,
                        parent,
                        format!("COPY {} {}", file_name, workdir),
                    )
                    .await?
            }
        };

        let host_path = image_path(&self.store.diff_dir(&layer.fingerprint), &workdir)?.join(&file_name);
        debug!(
            "Manifest {} lists {} requirements",
            host_path.display(),
            parsed.requirements.len()
        );
        self.manifest = Some(ManifestInput { host_path, parsed });
        Ok(self.push(layer, Phase::Manifest))
    }

    /// Install the copied manifest's dependencies into their own layer.
    ///
    /// The layer only holds installed packages; installer caches go to the
    /// step's scratch directory and are discarded at commit.
    pub async fn install_dependencies(&mut self) -> SlipwayResult<Layer> {
        self.require(LayerKind::InstallDependencies, Phase::Manifest)?;
        let manifest = self.manifest.clone().ok_or_else(|| SlipwayError::BuildOrder {
            step: LayerKind::InstallDependencies.to_string(),
            reason: "no manifest has been copied".to_string(),
        })?;

        let parent = self.parent().cloned();
        let key = self.installer.cache_key();
        let fingerprint = Fingerprint::chain(
            parent.as_ref(),
            LayerKind::InstallDependencies,
            &[key.as_bytes()],
        );

        if let Some(layer) = self.cached(&fingerprint).await? {
            return Ok(self.push(layer, Phase::Installed));
        }

        let staging = self.store.stage().await?;
        let target = image_path(&staging.diff(), DEPS_PREFIX)?;
        tokio::fs::create_dir_all(&target)
            .await
            .map_err(|e| SlipwayError::io("creating install target", e))?;

        let packages = self
            .installer
            .install(&manifest.host_path, &manifest.parsed, &target, &staging.scratch())
            .await?;
        for package in &packages {
            debug!("Installed {} {}", package.name, package.version);
        }

        let layer = self
            .store
            .commit(
                staging,
                LayerKind::InstallDependencies,
                fingerprint,
                parent,
                format!(
                    "RUN install {} packages ({})",
                    packages.len(),
                    self.installer.name()
                ),
            )
            .await?;
        Ok(self.push(layer, Phase::Installed))
    }

    /// Copy the application tree into the working directory
    pub async fn copy_source(&mut self, source_tree: &Path, ignore: &[String]) -> SlipwayResult<Layer> {
        self.require(LayerKind::CopySource, Phase::Installed)?;
        if !source_tree.is_dir() {
            return Err(SlipwayError::BuildInputMissing(source_tree.to_path_buf()));
        }

        let (tree, ignored) = (source_tree.to_path_buf(), ignore.to_vec());
        let tree_hash = run_blocking(move || hash_tree(&tree, &ignored)).await?;

        let workdir = self.workdir().to_string();
        let ignore_list = ignore.join("\n");
        let parent = self.parent().cloned();
        let fingerprint = Fingerprint::chain(
            parent.as_ref(),
            LayerKind::CopySource,
            &[workdir.as_bytes(), tree_hash.as_bytes(), ignore_list.as_bytes()],
        );

        if let Some(layer) = self.cached(&fingerprint).await? {
            return Ok(self.push(layer, Phase::Source));
        }

        let staging = self.store.stage().await?;
        let dest = image_path(&staging.diff(), &workdir)?;
        let (tree, ignored) = (source_tree.to_path_buf(), ignore.to_vec());
        run_blocking(move || copy_tree(&tree, &dest, &ignored)).await?;

        let layer = self
            .store
            .commit(
                staging,
                LayerKind::CopySource,
                fingerprint,
                parent,
                format!("COPY . {}", workdir),
            )
            .await?;
        Ok(self.push(layer, Phase::Source))
    }

    /// Record the port the application listens on. Advisory only.
    pub fn declare_port(&mut self, port: u16) -> SlipwayResult<()> {
        if port == 0 {
            return Err(SlipwayError::User(
                "declared port must be between 1 and 65535".to_string(),
            ));
        }
        self.exposed_port = Some(port);
        Ok(())
    }

    /// Record an environment variable in the image
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.env.insert(key.into(), value.into());
    }

    /// Fix the start command and record the finished image.
    ///
    /// Rebuilding identical inputs returns the already-recorded image id.
    pub async fn set_entrypoint(self, command: Vec<String>) -> SlipwayResult<Image> {
        if self.phase != Phase::Source {
            return Err(SlipwayError::BuildOrder {
                step: "set_entrypoint".to_string(),
                reason: format!("the image is incomplete ({})", self.phase),
            });
        }
        if command.is_empty() {
            return Err(SlipwayError::User("entrypoint command is empty".to_string()));
        }

        let config = ImageConfig {
            base: self.base.clone().unwrap_or_default(),
            workdir: self.workdir().to_string(),
            exposed_port: self.exposed_port,
            entrypoint: command,
            env: self.env,
        };
        let mut image = Image::new(self.layers, config)?;

        if !self.store.write_image(&image).await? {
            image.created_at = self.store.load_image(&image.id).await?.created_at;
        }
        info!("Image {} ({} layers)", image.short_id(), image.layers.len());
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::base::CatalogResolver;
    use crate::build::install::IndexInstaller;
    use tempfile::TempDir;

    const BASE: &str = "python:3.12.4-slim";

    struct Fixture {
        dir: TempDir,
        store: LayerStore,
    }

    impl Fixture {
        async fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let rootfs = dir.path().join("rootfs");
            std::fs::create_dir_all(rootfs.join("usr/bin")).unwrap();
            std::fs::write(rootfs.join("usr/bin/python3"), "#!runtime").unwrap();

            let pkg = dir.path().join("index/flask/3.0.0/flask");
            std::fs::create_dir_all(&pkg).unwrap();
            std::fs::write(pkg.join("__init__.py"), "class Flask: pass\n").unwrap();

            let app = dir.path().join("app");
            std::fs::create_dir_all(&app).unwrap();
            std::fs::write(app.join("requirements.txt"), "flask==3.0\n").unwrap();
            std::fs::write(app.join("app.py"), "flask_app = None\n").unwrap();

            let store = LayerStore::open(dir.path().join("store")).await.unwrap();
            Self { dir, store }
        }

        fn builder(&self) -> ImageBuilder {
            let mut bases = BTreeMap::new();
            bases.insert(BASE.to_string(), self.dir.path().join("rootfs"));
            ImageBuilder::new(
                self.store.clone(),
                Box::new(CatalogResolver::new(&bases, self.dir.path())),
                Box::new(IndexInstaller::new(self.dir.path().join("index"))),
            )
        }

        fn app(&self) -> PathBuf {
            self.dir.path().join("app")
        }
    }

    #[tokio::test]
    async fn builds_all_layers_in_order() {
        let fx = Fixture::new().await;
        let mut builder = fx.builder();

        builder.select_base(BASE).await.unwrap();
        builder.set_workdir("/app").await.unwrap();
        builder.copy_manifest(&fx.app().join("requirements.txt")).await.unwrap();
        builder.install_dependencies().await.unwrap();
        builder.copy_source(&fx.app(), &[]).await.unwrap();
        builder.declare_port(8080).unwrap();
        let image = builder.set_entrypoint(vec!["serve".to_string()]).await.unwrap();

        let kinds: Vec<LayerKind> = image.layers.iter().map(|l| l.kind).collect();
        assert_eq!(kinds, LayerKind::ORDER.to_vec());
        assert_eq!(image.config.exposed_port, Some(8080));
        assert!(image.layers.iter().all(|l| l.outcome == CacheOutcome::Miss));

        let install = image.layer(LayerKind::InstallDependencies).unwrap();
        let site = image_path(&fx.store.diff_dir(&install.fingerprint), DEPS_PREFIX).unwrap();
        assert!(site.join("flask/__init__.py").is_file());
    }

    #[tokio::test]
    async fn source_before_install_is_rejected() {
        let fx = Fixture::new().await;
        let mut builder = fx.builder();
        builder.select_base(BASE).await.unwrap();
        builder.set_workdir("/app").await.unwrap();

        let err = builder.copy_source(&fx.app(), &[]).await.unwrap_err();

        assert!(matches!(err, SlipwayError::BuildOrder { .. }));
        assert_eq!(builder.phase(), Phase::Workdir);
    }

    #[tokio::test]
    async fn steps_cannot_repeat() {
        let fx = Fixture::new().await;
        let mut builder = fx.builder();
        builder.select_base(BASE).await.unwrap();
        assert!(matches!(
            builder.select_base(BASE).await,
            Err(SlipwayError::BuildOrder { .. })
        ));
    }

    #[tokio::test]
    async fn floating_base_is_rejected() {
        let fx = Fixture::new().await;
        let mut builder = fx.builder();
        assert!(matches!(
            builder.select_base("python:latest").await,
            Err(SlipwayError::BaseNotPinned(_))
        ));
    }

    #[tokio::test]
    async fn failed_install_commits_nothing() {
        let fx = Fixture::new().await;
        std::fs::write(fx.app().join("requirements.txt"), "flask==9.9\n").unwrap();
        let mut builder = fx.builder();
        builder.select_base(BASE).await.unwrap();
        builder.set_workdir("/app").await.unwrap();
        builder.copy_manifest(&fx.app().join("requirements.txt")).await.unwrap();

        let err = builder.install_dependencies().await.unwrap_err();

        assert!(err.is_build_failure());
        assert_eq!(fx.store.list_layers().await.unwrap().len(), 3);
        assert!(fx.store.list_images().await.unwrap().is_empty());
        let staging = fx.dir.path().join("store/tmp");
        assert_eq!(std::fs::read_dir(staging).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn workdir_must_be_absolute() {
        let fx = Fixture::new().await;
        let mut builder = fx.builder();
        builder.select_base(BASE).await.unwrap();
        assert!(builder.set_workdir("app").await.is_err());
        assert!(builder.set_workdir("/app/../etc").await.is_err());
    }

    #[tokio::test]
    async fn port_zero_is_rejected() {
        let fx = Fixture::new().await;
        let mut builder = fx.builder();
        assert!(builder.declare_port(0).is_err());
        assert!(builder.declare_port(8080).is_ok());
    }
}
