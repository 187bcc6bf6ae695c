//! Slipway - layered image builds and pre-fork web workers
//!
//! Builds a reproducible runtime image for a web application from a pinned
//! base, a dependency manifest and a source tree, caching each layer by a
//! content fingerprint. Launching an image starts a supervisor that binds
//! one listening socket and shares it with a fixed pool of workers.

pub mod build;
pub mod cli;
pub mod config;
pub mod error;
pub mod journal;
pub mod layer;
pub mod supervisor;
pub mod ui;

pub use error::{SlipwayError, SlipwayResult};
