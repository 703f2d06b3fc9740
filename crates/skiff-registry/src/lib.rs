//! Registry access for Skiff.
//!
//! This crate speaks the registry v2 pull protocol: an [`AuthSession`] obtains
//! and caches an anonymous bearer token, a [`RegistryClient`] fetches image
//! manifests and layer blobs with it, and [`ImageReference`] / [`RegistryConfig`]
//! describe what to pull and from where.

pub mod auth;
pub mod client;
pub mod config;
pub mod manifest;
pub mod reference;

pub use auth::{AuthSession, AuthToken};
pub use client::RegistryClient;
pub use config::RegistryConfig;
pub use manifest::{LayerDescriptor, Manifest};
pub use reference::ImageReference;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("manifest fetch failed for {reference}: {reason}")]
    ManifestFetch { reference: String, reason: String },
    #[error("layer fetch failed for {digest}: {reason}")]
    LayerFetch { digest: String, reason: String },
    #[error("invalid image reference '{input}': {reason}")]
    InvalidReference { input: String, reason: String },
    #[error("registry config error: {0}")]
    Config(String),
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
}
