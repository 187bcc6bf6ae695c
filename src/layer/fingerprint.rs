//! Content-addressed layer fingerprints
//!
//! A fingerprint is the SHA256 of the parent fingerprint, the layer kind and
//! the layer's own inputs. Nothing else feeds the hash, so a change anywhere
//! upstream changes every fingerprint downstream of it.

use crate::layer::LayerKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const DOMAIN: &[u8] = b"slipway-layer-v1";

/// Full 64-character hex fingerprint of a layer
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Chain a new fingerprint onto `parent` from a layer's inputs.
    ///
    /// Every input is length-prefixed so `["ab", "c"]` and `["a", "bc"]`
    /// never collide.
    pub fn chain(parent: Option<&Fingerprint>, kind: LayerKind, inputs: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN);
        match parent {
            Some(parent) => {
                hasher.update([1u8]);
                hasher.update(parent.0.as_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(kind.as_str().as_bytes());
        for input in inputs {
            hasher.update((input.len() as u64).to_le_bytes());
            hasher.update(input);
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an existing hex string, validating its shape
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase());
        valid.then(|| Self(s.to_string()))
    }

    /// Full hex representation
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA256 of a byte slice as lowercase hex
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
