//! Image records: an ordered layer chain plus launch metadata

use crate::error::SlipwayResult;
use crate::layer::fingerprint::sha256_hex;
use crate::layer::{CacheOutcome, Layer, LayerKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata recorded alongside an image's layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Base reference the image was built from
    pub base: String,

    /// Working directory for the launched process
    pub workdir: String,

    /// Advisory listening port
    pub exposed_port: Option<u16>,

    /// Command executed at container start
    pub entrypoint: Vec<String>,

    /// Environment given to the launched process
    pub env: BTreeMap<String, String>,
}

/// An immutable image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    /// Content-addressed image id
    pub id: String,

    /// Layers in application order
    pub layers: Vec<Layer>,

    /// Launch metadata
    pub config: ImageConfig,

    /// When this image record was first written
    pub created_at: DateTime<Utc>,
}

impl Image {
    /// Assemble an image, deriving its id from the layer chain and config.
    ///
    /// Build outcomes and timestamps are not part of the id, so rebuilding
    /// identical inputs yields the same id.
    pub fn new(layers: Vec<Layer>, config: ImageConfig) -> SlipwayResult<Self> {
        let mut material = String::new();
        for layer in &layers {
            material.push_str(layer.fingerprint.as_str());
            material.push('\n');
        }
        material.push_str(&serde_json::to_string(&config)?);

        Ok(Self {
            id: sha256_hex(material.as_bytes()),
            layers,
            config,
            created_at: Utc::now(),
        })
    }

    /// First 12 characters of the id
    pub fn short_id(&self) -> &str {
        &self.id[..12.min(self.id.len())]
    }

    /// The layer of the given kind, if present
    pub fn layer(&self, kind: LayerKind) -> Option<&Layer> {
        self.layers.iter().find(|l| l.kind == kind)
    }

    /// Total size of all layer deltas
    pub fn size_bytes(&self) -> u64 {
        self.layers.iter().map(|l| l.size_bytes).sum()
    }

    /// Number of layers reused from the store in the producing build
    pub fn cache_hits(&self) -> usize {
        self.layers
            .iter()
            .filter(|l| l.outcome == CacheOutcome::Hit)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Fingerprint;

    fn layer(kind: LayerKind, input: &[u8], outcome: CacheOutcome) -> Layer {
        Layer {
            kind,
            fingerprint: Fingerprint::chain(None, kind, &[input]),
            parent: None,
            description: kind.to_string(),
            size_bytes: 10,
            created_at: Utc::now(),
            outcome,
        }
    }

    fn config() -> ImageConfig {
        ImageConfig {
            base: "python:3.12.4-slim".to_string(),
            workdir: "/app".to_string(),
            exposed_port: Some(8080),
            entrypoint: vec!["slipway".to_string(), "supervise".to_string()],
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn id_ignores_outcome_and_time() {
        let a = Image::new(vec![layer(LayerKind::Base, b"x", CacheOutcome::Miss)], config()).unwrap();
        let b = Image::new(vec![layer(LayerKind::Base, b"x", CacheOutcome::Hit)], config()).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn id_tracks_metadata() {
        let a = Image::new(vec![layer(LayerKind::Base, b"x", CacheOutcome::Miss)], config()).unwrap();
        let mut other = config();
        other.exposed_port = Some(9090);
        let b = Image::new(vec![layer(LayerKind::Base, b"x", CacheOutcome::Miss)], other).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn size_and_hits() {
        let image = Image::new(
            vec![
                layer(LayerKind::Base, b"x", CacheOutcome::Hit),
                layer(LayerKind::Workdir, b"y", CacheOutcome::Miss),
            ],
            config(),
        )
        .unwrap();
        assert_eq!(image.size_bytes(), 20);
        assert_eq!(image.cache_hits(), 1);
        assert_eq!(image.short_id().len(), 12);
        assert!(image.layer(LayerKind::Workdir).is_some());
        assert!(image.layer(LayerKind::CopySource).is_none());
    }
}
