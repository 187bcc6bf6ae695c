//! On-disk layer and image store
//!
//! Layout under the store root:
//!
//! | Path | Contents |
//! |------|----------|
//! | `layers/<fingerprint>/layer.json` | layer record |
//! | `layers/<fingerprint>/diff/` | filesystem delta |
//! | `images/<id>.json` | image record (write-once) |
//! | `tags/<name>` | image id a tag points at |
//! | `tmp/<uuid>/` | staging area for layers being built |
//!
//! A layer only becomes visible through a single `rename` of its staging
//! directory, so an interrupted build never leaves a half-written layer.
//! Staging entries untouched for a day are swept the next time the store
//! is opened; younger ones may belong to a build still in progress.

use crate::error::{SlipwayError, SlipwayResult};
use crate::layer::tree::{copy_tree, run_blocking, tree_size};
use crate::layer::{CacheOutcome, Fingerprint, Image, Layer, LayerKind};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

const LAYER_RECORD: &str = "layer.json";

/// Age after which an untouched staging entry is considered abandoned
pub const STALE_STAGING_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// A layer being assembled in the staging area.
///
/// Dropping an uncommitted staging directory deletes it.
#[derive(Debug)]
pub struct Staging {
    dir: PathBuf,
    committed: bool,
}

impl Staging {
    /// Directory that becomes the layer's delta
    pub fn diff(&self) -> PathBuf {
        self.dir.join("diff")
    }

    /// Scratch space discarded at commit (installer caches, temp files)
    pub fn scratch(&self) -> PathBuf {
        self.dir.join("scratch")
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_dir_all(&self.dir);
        }
    }
}

/// Content-addressed store of layers and images
#[derive(Debug, Clone)]
pub struct LayerStore {
    root: PathBuf,
}

impl LayerStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> SlipwayResult<Self> {
        let store = Self { root: root.into() };

        for dir in [
            store.layers_dir(),
            store.images_dir(),
            store.tags_dir(),
            store.tmp_dir(),
        ] {
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| SlipwayError::io(format!("creating {}", dir.display()), e))?;
        }

        let swept = store.sweep_staging().await?;
        if swept > 0 {
            info!("Removed {} staging entries left by interrupted builds", swept);
        }

        Ok(store)
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn layers_dir(&self) -> PathBuf {
        self.root.join("layers")
    }

    fn images_dir(&self) -> PathBuf {
        self.root.join("images")
    }

    fn tags_dir(&self) -> PathBuf {
        self.root.join("tags")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn layer_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.layers_dir().join(fingerprint.as_str())
    }

    /// Delta directory of a committed layer
    pub fn diff_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.layer_dir(fingerprint).join("diff")
    }

    /// Remove staging entries left behind by interrupted processes.
    ///
    /// Entries younger than [`STALE_STAGING_AFTER`] may belong to a build
    /// that is still running and are left alone. Failures are logged and
    /// never stop the store from opening.
    async fn sweep_staging(&self) -> SlipwayResult<usize> {
        let mut swept = 0;
        let mut entries = fs::read_dir(self.tmp_dir())
            .await
            .map_err(|e| SlipwayError::io("reading staging directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SlipwayError::io("reading staging entry", e))?
        {
            let path = entry.path();
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Cannot stat staging entry {}: {}", path.display(), e);
                    continue;
                }
            };
            if !is_stale(&metadata) {
                continue;
            }

            debug!("Sweeping stale staging entry {}", path.display());
            let removed = if metadata.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match removed {
                Ok(()) => swept += 1,
                Err(e) => warn!("Failed to remove staging entry {}: {}", path.display(), e),
            }
        }
        Ok(swept)
    }

    /// Whether a committed layer exists for `fingerprint`
    pub fn has_layer(&self, fingerprint: &Fingerprint) -> bool {
        self.layer_dir(fingerprint).join(LAYER_RECORD).is_file()
    }

    /// Load a committed layer record
    pub async fn load_layer(&self, fingerprint: &Fingerprint) -> SlipwayResult<Layer> {
        let path = self.layer_dir(fingerprint).join(LAYER_RECORD);
        if !path.is_file() {
            return Err(SlipwayError::LayerNotFound(fingerprint.to_string()));
        }
        read_json(&path).await
    }

    /// Start a new staging area
    pub async fn stage(&self) -> SlipwayResult<Staging> {
        let dir = self.tmp_dir().join(uuid::Uuid::new_v4().to_string());
        let staging = Staging {
            dir,
            committed: false,
        };
        for path in [staging.diff(), staging.scratch()] {
            fs::create_dir_all(&path)
                .await
                .map_err(|e| SlipwayError::io(format!("creating {}", path.display()), e))?;
        }
        Ok(staging)
    }

    /// Atomically publish a staged delta as a layer.
    ///
    /// If another build committed the same fingerprint first, the staged
    /// copy is discarded and the existing record is returned.
    pub async fn commit(
        &self,
        mut staging: Staging,
        kind: LayerKind,
        fingerprint: Fingerprint,
        parent: Option<Fingerprint>,
        description: String,
    ) -> SlipwayResult<Layer> {
        let scratch = staging.scratch();
        if scratch.exists() {
            fs::remove_dir_all(&scratch)
                .await
                .map_err(|e| SlipwayError::io("removing scratch directory", e))?;
        }

        let diff = staging.diff();
        let size_bytes = run_blocking(move || tree_size(&diff)).await?;

        let layer = Layer {
            kind,
            fingerprint,
            parent,
            description,
            size_bytes,
            created_at: Utc::now(),
            outcome: CacheOutcome::Miss,
        };
        write_json(&staging.dir.join(LAYER_RECORD), &layer).await?;

        let target = self.layer_dir(&layer.fingerprint);
        match fs::rename(&staging.dir, &target).await {
            Ok(()) => {
                staging.committed = true;
                debug!("Committed layer {} ({})", layer.fingerprint.short(), kind);
                Ok(layer)
            }
            Err(_) if self.has_layer(&layer.fingerprint) => {
                debug!("Layer {} committed concurrently", layer.fingerprint.short());
                Ok(self
                    .load_layer(&layer.fingerprint)
                    .await?
                    .with_outcome(CacheOutcome::Miss))
            }
            Err(e) => Err(SlipwayError::io(
                format!("committing layer {}", layer.fingerprint.short()),
                e,
            )),
        }
    }

    /// List every committed layer
    pub async fn list_layers(&self) -> SlipwayResult<Vec<Layer>> {
        let mut layers = vec![];
        let mut entries = fs::read_dir(self.layers_dir())
            .await
            .map_err(|e| SlipwayError::io("reading layers directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SlipwayError::io("reading layer entry", e))?
        {
            let record = entry.path().join(LAYER_RECORD);
            match read_json::<Layer>(&record).await {
                Ok(layer) => layers.push(layer),
                Err(e) => warn!("Skipping unreadable layer {}: {}", entry.path().display(), e),
            }
        }

        layers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(layers)
    }

    /// Record an image. Existing records are never rewritten.
    ///
    /// Returns `false` if an identical image was already recorded.
    pub async fn write_image(&self, image: &Image) -> SlipwayResult<bool> {
        let path = self.images_dir().join(format!("{}.json", image.id));
        if path.exists() {
            debug!("Image {} already recorded", image.short_id());
            return Ok(false);
        }

        for layer in &image.layers {
            if !self.has_layer(&layer.fingerprint) {
                return Err(SlipwayError::LayerNotFound(layer.fingerprint.to_string()));
            }
        }

        let tmp = self
            .tmp_dir()
            .join(format!("{}.image.json", uuid::Uuid::new_v4()));
        write_json(&tmp, image).await?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| SlipwayError::io(format!("recording image {}", image.short_id()), e))?;
        Ok(true)
    }

    /// Load an image by full id
    pub async fn load_image(&self, id: &str) -> SlipwayResult<Image> {
        let path = self.images_dir().join(format!("{}.json", id));
        if !path.is_file() {
            return Err(SlipwayError::ImageNotFound(id.to_string()));
        }
        read_json(&path).await
    }

    /// List every recorded image, newest first
    pub async fn list_images(&self) -> SlipwayResult<Vec<Image>> {
        let mut images = vec![];
        let mut entries = fs::read_dir(self.images_dir())
            .await
            .map_err(|e| SlipwayError::io("reading images directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SlipwayError::io("reading image entry", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                match read_json::<Image>(&path).await {
                    Ok(image) => images.push(image),
                    Err(e) => warn!("Skipping unreadable image {}: {}", path.display(), e),
                }
            }
        }

        images.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(images)
    }

    /// Point a tag at an image id
    pub async fn tag_image(&self, tag: &str, id: &str) -> SlipwayResult<()> {
        validate_tag(tag)?;
        if !self.images_dir().join(format!("{}.json", id)).is_file() {
            return Err(SlipwayError::ImageNotFound(id.to_string()));
        }

        let tmp = self.tmp_dir().join(format!("{}.tag", uuid::Uuid::new_v4()));
        fs::write(&tmp, id)
            .await
            .map_err(|e| SlipwayError::io(format!("writing tag {}", tag), e))?;
        fs::rename(&tmp, self.tags_dir().join(tag))
            .await
            .map_err(|e| SlipwayError::io(format!("writing tag {}", tag), e))
    }

    /// Tags currently pointing at `id`
    pub async fn tags_for(&self, id: &str) -> SlipwayResult<Vec<String>> {
        let mut tags = vec![];
        let mut entries = fs::read_dir(self.tags_dir())
            .await
            .map_err(|e| SlipwayError::io("reading tags directory", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SlipwayError::io("reading tag entry", e))?
        {
            if let Ok(target) = fs::read_to_string(entry.path()).await {
                if target.trim() == id {
                    tags.push(entry.file_name().to_string_lossy().to_string());
                }
            }
        }
        tags.sort();
        Ok(tags)
    }

    /// Resolve a tag, full id, or unique id prefix to an image
    pub async fn resolve_image(&self, reference: &str) -> SlipwayResult<Image> {
        if validate_tag(reference).is_ok() {
            let tag_path = self.tags_dir().join(reference);
            if tag_path.is_file() {
                let id = fs::read_to_string(&tag_path)
                    .await
                    .map_err(|e| SlipwayError::io(format!("reading tag {}", reference), e))?;
                return self.load_image(id.trim()).await;
            }
        }

        let is_prefix = reference.len() >= 4
            && reference.len() <= 64
            && reference.bytes().all(|b| b.is_ascii_hexdigit());
        if !is_prefix {
            return Err(SlipwayError::ImageNotFound(reference.to_string()));
        }

        let mut matches: Vec<Image> = self
            .list_images()
            .await?
            .into_iter()
            .filter(|image| image.id.starts_with(reference))
            .collect();

        match matches.len() {
            0 => Err(SlipwayError::ImageNotFound(reference.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(SlipwayError::ImageAmbiguous(reference.to_string())),
        }
    }

    /// Apply every layer of `image` in order onto `dest`
    pub async fn materialize(&self, image: &Image, dest: &Path) -> SlipwayResult<()> {
        let mut diffs = Vec::with_capacity(image.layers.len());
        for layer in &image.layers {
            let diff = self.diff_dir(&layer.fingerprint);
            if !diff.is_dir() {
                return Err(SlipwayError::LayerNotFound(layer.fingerprint.to_string()));
            }
            diffs.push(diff);
        }

        let dest = dest.to_path_buf();
        run_blocking(move || {
            for diff in &diffs {
                copy_tree(diff, &dest, &[])?;
            }
            Ok(())
        })
        .await?;

        debug!("Materialized image {} ({} layers)", image.short_id(), image.layers.len());
        Ok(())
    }

    /// Layers no recorded image refers to
    pub async fn unreferenced_layers(&self) -> SlipwayResult<Vec<Layer>> {
        let referenced: HashSet<Fingerprint> = self
            .list_images()
            .await?
            .into_iter()
            .flat_map(|image| image.layers.into_iter().map(|l| l.fingerprint))
            .collect();

        Ok(self
            .list_layers()
            .await?
            .into_iter()
            .filter(|layer| !referenced.contains(&layer.fingerprint))
            .collect())
    }

    /// Delete layers no recorded image refers to
    pub async fn prune(&self) -> SlipwayResult<Vec<Layer>> {
        let mut removed = vec![];
        for layer in self.unreferenced_layers().await? {
            debug!("Pruning layer {}", layer.fingerprint.short());
            fs::remove_dir_all(self.layer_dir(&layer.fingerprint))
                .await
                .map_err(|e| SlipwayError::io("removing layer", e))?;
            removed.push(layer);
        }
        Ok(removed)
    }

    /// Remove every layer, image and tag
    pub async fn clear(&self) -> SlipwayResult<()> {
        for dir in [self.layers_dir(), self.images_dir(), self.tags_dir()] {
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .await
                    .map_err(|e| SlipwayError::io(format!("removing {}", dir.display()), e))?;
            }
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| SlipwayError::io(format!("creating {}", dir.display()), e))?;
        }
        Ok(())
    }
}

fn is_stale(metadata: &std::fs::Metadata) -> bool {
    metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= STALE_STAGING_AFTER)
}

fn validate_tag(tag: &str) -> SlipwayResult<()> {
    let valid = !tag.is_empty()
        && tag.len() <= 128
        && !tag.starts_with('.')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(())
    } else {
        Err(SlipwayError::User(format!(
            "invalid tag '{}': use letters, digits, '.', '_' or '-'",
            tag
        )))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> SlipwayResult<T> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| SlipwayError::io(format!("reading {}", path.display()), e))?;
    serde_json::from_str(&content).map_err(|e| SlipwayError::StoreCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> SlipwayResult<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content)
        .await
        .map_err(|e| SlipwayError::io(format!("writing {}", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::ImageConfig;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    async fn commit_file(store: &LayerStore, kind: LayerKind, name: &str, body: &str) -> Layer {
        let staging = store.stage().await.unwrap();
        std::fs::write(staging.diff().join(name), body).unwrap();
        let fp = Fingerprint::chain(None, kind, &[body.as_bytes()]);
        store
            .commit(staging, kind, fp, None, format!("{kind} {name}"))
            .await
            .unwrap()
    }

    fn config() -> ImageConfig {
        ImageConfig {
            base: "python:3.12.4-slim".to_string(),
            workdir: "/app".to_string(),
            exposed_port: Some(8080),
            entrypoint: vec![],
            env: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn commit_makes_layer_visible() {
        let dir = TempDir::new().unwrap();
        let store = LayerStore::open(dir.path()).await.unwrap();

        let layer = commit_file(&store, LayerKind::Base, "a.txt", "hello").await;

        assert!(store.has_layer(&layer.fingerprint));
        assert_eq!(layer.size_bytes, 5);
        let loaded = store.load_layer(&layer.fingerprint).await.unwrap();
        assert_eq!(loaded.fingerprint, layer.fingerprint);
        assert!(store.diff_dir(&layer.fingerprint).join("a.txt").is_file());
    }

    #[tokio::test]
    async fn dropped_staging_leaves_nothing() {
        let dir = TempDir::new().unwrap();
        let store = LayerStore::open(dir.path()).await.unwrap();

        {
            let staging = store.stage().await.unwrap();
            std::fs::write(staging.diff().join("partial"), "x").unwrap();
        }

        assert_eq!(std::fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
        assert!(store.list_layers().await.unwrap().is_empty());
    }

    fn age(path: &Path) {
        let when = SystemTime::now() - STALE_STAGING_AFTER - Duration::from_secs(60);
        std::fs::File::open(path)
            .unwrap()
            .set_modified(when)
            .unwrap();
    }

    #[tokio::test]
    async fn open_sweeps_stale_staging() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("tmp").join("stale");
        std::fs::create_dir_all(stale.join("diff")).unwrap();
        age(&stale);

        LayerStore::open(dir.path()).await.unwrap();

        assert_eq!(std::fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn open_removes_leftover_image_and_tag_files() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("tmp");
        std::fs::create_dir_all(&tmp).unwrap();
        for name in ["interrupted.image.json", "interrupted.tag"] {
            std::fs::write(tmp.join(name), "{}").unwrap();
            age(&tmp.join(name));
        }

        let store = LayerStore::open(dir.path()).await.unwrap();

        assert_eq!(std::fs::read_dir(&tmp).unwrap().count(), 0);
        assert!(store.list_images().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_keeps_recent_leftover_files() {
        let dir = TempDir::new().unwrap();
        let tmp = dir.path().join("tmp");
        std::fs::create_dir_all(&tmp).unwrap();
        std::fs::write(tmp.join("recent.image.json"), "{}").unwrap();

        LayerStore::open(dir.path()).await.unwrap();

        assert!(tmp.join("recent.image.json").is_file());
    }

    #[tokio::test]
    async fn reopening_store_keeps_inflight_staging() {
        let dir = TempDir::new().unwrap();
        let store = LayerStore::open(dir.path()).await.unwrap();
        let staging = store.stage().await.unwrap();
        std::fs::write(staging.diff().join("a.txt"), "in flight").unwrap();

        LayerStore::open(dir.path()).await.unwrap();

        assert!(staging.diff().join("a.txt").is_file());
        let fp = Fingerprint::chain(None, LayerKind::Base, &[b"in flight".as_slice()]);
        let layer = store
            .commit(staging, LayerKind::Base, fp, None, "base".to_string())
            .await
            .unwrap();
        assert!(store.diff_dir(&layer.fingerprint).join("a.txt").is_file());
    }

    #[tokio::test]
    async fn images_are_write_once() {
        let dir = TempDir::new().unwrap();
        let store = LayerStore::open(dir.path()).await.unwrap();
        let layer = commit_file(&store, LayerKind::Base, "a.txt", "hello").await;

        let image = Image::new(vec![layer.clone()], config()).unwrap();
        assert!(store.write_image(&image).await.unwrap());

        let again = Image::new(vec![layer], config()).unwrap();
        assert!(!store.write_image(&again).await.unwrap());

        let loaded = store.load_image(&image.id).await.unwrap();
        assert_eq!(loaded.created_at, image.created_at);
    }

    #[tokio::test]
    async fn resolve_by_tag_and_prefix() {
        let dir = TempDir::new().unwrap();
        let store = LayerStore::open(dir.path()).await.unwrap();
        let layer = commit_file(&store, LayerKind::Base, "a.txt", "hello").await;
        let image = Image::new(vec![layer], config()).unwrap();
        store.write_image(&image).await.unwrap();
        store.tag_image("web", &image.id).await.unwrap();

        assert_eq!(store.resolve_image("web").await.unwrap().id, image.id);
        assert_eq!(store.resolve_image(&image.id[..8]).await.unwrap().id, image.id);
        assert_eq!(store.tags_for(&image.id).await.unwrap(), vec!["web"]);
        assert!(matches!(
            store.resolve_image("missing").await,
            Err(SlipwayError::ImageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn tag_rejects_path_characters() {
        let dir = TempDir::new().unwrap();
        let store = LayerStore::open(dir.path()).await.unwrap();
        assert!(store.tag_image("../escape", "abc").await.is_err());
    }

    #[tokio::test]
    async fn materialize_applies_layers_in_order() {
        let dir = TempDir::new().unwrap();
        let store = LayerStore::open(dir.path()).await.unwrap();
        let first = commit_file(&store, LayerKind::Base, "f.txt", "first").await;
        let second = commit_file(&store, LayerKind::Workdir, "f.txt", "second").await;
        let image = Image::new(vec![first, second], config()).unwrap();

        let rootfs = TempDir::new().unwrap();
        store.materialize(&image, rootfs.path()).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(rootfs.path().join("f.txt")).unwrap(),
            "second"
        );
    }

    #[tokio::test]
    async fn prune_keeps_referenced_layers() {
        let dir = TempDir::new().unwrap();
        let store = LayerStore::open(dir.path()).await.unwrap();
        let kept = commit_file(&store, LayerKind::Base, "a.txt", "kept").await;
        let orphan = commit_file(&store, LayerKind::Base, "b.txt", "orphan").await;
        store
            .write_image(&Image::new(vec![kept.clone()], config()).unwrap())
            .await
            .unwrap();

        let removed = store.prune().await.unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].fingerprint, orphan.fingerprint);
        assert!(store.has_layer(&kept.fingerprint));
        assert!(!store.has_layer(&orphan.fingerprint));
    }
}
