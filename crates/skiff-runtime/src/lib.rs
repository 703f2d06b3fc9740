//! Execution layer for Skiff.
//!
//! This crate turns fetched layer archives into a runnable root filesystem and
//! runs a command inside it: [`RootFs`] owns the ephemeral directory,
//! [`extract_layers`] unpacks archives into it, and the [`Isolation`] trait
//! detaches the PID namespace and executes with the root rebound. A real
//! Linux implementation ([`NamespaceIsolation`]) and an unprivileged
//! [`MockIsolation`] are provided, plus prerequisite checks.

pub mod extract;
pub mod isolation;
pub mod mock;
pub mod namespace;
pub mod prereq;
pub mod rootfs;

pub use extract::{extract_layer, extract_layers};
pub use isolation::{select_isolation, ExecResult, Isolation};
pub use mock::{MockCall, MockIsolation};
pub use namespace::{kill_running_child, NamespaceIsolation};
pub use prereq::{check_isolation_prereqs, format_missing, MissingPrereq};
pub use rootfs::RootFs;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("layer extraction failed: {0}")]
    Extraction(String),
    #[error("isolation failed: {0}")]
    Isolation(String),
    #[error("exec failed: {0}")]
    Exec(String),
    #[error("isolation backend '{0}' is not available")]
    BackendUnavailable(String),
}
