//! Base image references
//!
//! A reference is `name[:tag][@sha256:<hex>]`. Only pinned references are
//! accepted for builds: either a digest, or a tag that starts with a full
//! `major.minor.patch` version.

use crate::error::{SlipwayError, SlipwayResult};
use std::fmt;

/// Tags that always float to a newer image
const FLOATING_TAGS: &[&str] = &["latest", "stable", "edge", "nightly", "lts", "current", "slim"];

/// A parsed base image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseReference {
    /// Repository name, e.g. `python` or `ghcr.io/org/runtime`
    pub name: String,
    /// Tag, e.g. `3.12.4-slim`
    pub tag: Option<String>,
    /// Hex digest after `@sha256:`
    pub digest: Option<String>,
}

impl BaseReference {
    /// Parse a reference string
    pub fn parse(s: &str) -> SlipwayResult<Self> {
        let s = s.trim();
        let invalid = |reason: &str| SlipwayError::BaseUnresolvable {
            reference: s.to_string(),
            reason: reason.to_string(),
        };

        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) => {
                let hex = digest
                    .strip_prefix("sha256:")
                    .ok_or_else(|| invalid("only sha256 digests are supported"))?;
                if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(invalid("digest must be 64 hex characters"));
                }
                (rest, Some(hex.to_ascii_lowercase()))
            }
            None => (s, None),
        };

        // A ':' before the last '/' belongs to a registry host:port.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&rest[..split], Some(rest[split + 1..].to_string()))
            }
            None => (rest, None),
        };

        if name.is_empty() {
            return Err(invalid("missing image name"));
        }
        if tag.as_deref() == Some("") {
            return Err(invalid("empty tag"));
        }

        Ok(Self {
            name: name.to_string(),
            tag,
            digest,
        })
    }

    /// Whether this reference names exactly one image
    pub fn is_pinned(&self) -> bool {
        if self.digest.is_some() {
            return true;
        }
        match &self.tag {
            Some(tag) => !FLOATING_TAGS.contains(&tag.as_str()) && has_full_version(tag),
            None => false,
        }
    }

    /// `name:tag` without the digest, used to look the base up in a catalog
    pub fn without_digest(&self) -> String {
        match &self.tag {
            Some(tag) => format!("{}:{}", self.name, tag),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for BaseReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.without_digest())?;
        if let Some(digest) = &self.digest {
            write!(f, "@sha256:{}", digest)?;
        }
        Ok(())
    }
}

/// `3.12.4`, `3.12.4-slim`, `1.0.0rc1` qualify; `3.12`, `3-slim` do not
fn has_full_version(tag: &str) -> bool {
    let version: String = tag
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let parts: Vec<&str> = version.trim_end_matches('.').split('.').collect();
    parts.len() >= 3 && parts.iter().all(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn parse_name_and_tag() {
        let r = BaseReference::parse("python:3.12.4-slim").unwrap();
        assert_eq!(r.name, "python");
        assert_eq!(r.tag.as_deref(), Some("3.12.4-slim"));
        assert!(r.digest.is_none());
        assert!(r.is_pinned());
    }

    #[test]
    fn parse_registry_with_port() {
        let r = BaseReference::parse("registry.local:5000/runtime/python:3.11.9").unwrap();
        assert_eq!(r.name, "registry.local:5000/runtime/python");
        assert_eq!(r.tag.as_deref(), Some("3.11.9"));
    }

    #[test]
    fn parse_digest() {
        let r = BaseReference::parse(&format!("python@sha256:{DIGEST}")).unwrap();
        assert_eq!(r.name, "python");
        assert!(r.tag.is_none());
        assert_eq!(r.digest.as_deref(), Some(DIGEST));
        assert!(r.is_pinned());
        assert_eq!(r.to_string(), format!("python@sha256:{DIGEST}"));
    }

    #[test]
    fn floating_tags_are_not_pinned() {
        for reference in ["python", "python:latest", "python:3.12", "python:3-slim", "python:slim"] {
            let r = BaseReference::parse(reference).unwrap();
            assert!(!r.is_pinned(), "{reference} should not be pinned");
        }
    }

    #[test]
    fn rejects_malformed_digest() {
        assert!(BaseReference::parse("python@sha256:abc").is_err());
        assert!(BaseReference::parse(&format!("python@md5:{DIGEST}")).is_err());
    }

    #[test]
    fn rejects_empty_parts() {
        assert!(BaseReference::parse(":3.12.4").is_err());
        assert!(BaseReference::parse("python:").is_err());
    }
}
