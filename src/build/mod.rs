//! Image building
//!
//! Turns a pinned base runtime, a dependency manifest and an application
//! tree into an image in the layer store:
//! - `reference`/`base`: pinned base references and their resolution
//! - `manifest`: requirement parsing and version matching
//! - `install`: dependency installer backends
//! - `builder`: the ordered, cache-aware layer steps
//! - `plan`: configuration-derived step lists

pub mod base;
mod builder;
pub mod install;
pub mod manifest;
mod plan;
mod reference;

pub use base::{BaseResolver, CatalogResolver, ResolvedBase};
pub use builder::{ImageBuilder, Phase};
pub use install::{create_installer, DependencyInstaller, InstalledPackage, DEPS_PREFIX};
pub use manifest::{DependencyManifest, Requirement};
pub use plan::{BuildPlan, Step};
pub use reference::BaseReference;

use crate::config::schema::Config;
use crate::error::SlipwayResult;
use crate::layer::LayerStore;
use std::path::Path;

/// Image builder wired to the configured base catalog and installer.
///
/// Relative catalog and index paths resolve against `project_dir`.
pub fn builder_for(config: &Config, project_dir: &Path, store: LayerStore) -> SlipwayResult<ImageBuilder> {
    let resolver = CatalogResolver::new(&config.bases, project_dir);
    let installer = create_installer(&config.install, project_dir)?;
    Ok(ImageBuilder::new(store, Box::new(resolver), installer))
}
