//! Content-addressed layers
//!
//! Layers are immutable filesystem deltas identified by a fingerprint that
//! chains onto their parent's. Images are ordered layer chains plus the
//! metadata needed to launch them.

pub mod fingerprint;
mod image;
pub mod store;
pub mod tree;
mod types;

pub use fingerprint::Fingerprint;
pub use image::{Image, ImageConfig};
pub use store::{LayerStore, Staging};
pub use types::{CacheOutcome, Layer, LayerKind};
