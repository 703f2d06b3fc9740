//! Orchestration for Skiff.
//!
//! The [`Engine`] chains the registry client and the runtime into one
//! linear pipeline: fetch the manifest, fetch and extract each layer into a
//! fresh [`skiff_runtime::RootFs`], run the command in isolation, and hand
//! back its exit code. Every failure is a [`CoreError`] whose [`ErrorKind`]
//! names the stage that broke.

pub mod cleanup;
pub mod engine;

pub use cleanup::install_signal_handler;
pub use engine::{Engine, PullEvent, PullSummary, RunOptions};

use skiff_registry::RegistryError;
use skiff_runtime::RuntimeError;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The pipeline stage a [`CoreError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthFailure,
    ManifestFetchFailure,
    LayerFetchFailure,
    ExtractionFailure,
    IsolationFailure,
    ExecFailure,
    InvalidReference,
    Config,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::AuthFailure => "AuthFailure",
            ErrorKind::ManifestFetchFailure => "ManifestFetchFailure",
            ErrorKind::LayerFetchFailure => "LayerFetchFailure",
            ErrorKind::ExtractionFailure => "ExtractionFailure",
            ErrorKind::IsolationFailure => "IsolationFailure",
            ErrorKind::ExecFailure => "ExecFailure",
            ErrorKind::InvalidReference => "InvalidReference",
            ErrorKind::Config => "Config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Registry(e) => match e {
                RegistryError::Auth(_) => ErrorKind::AuthFailure,
                RegistryError::ManifestFetch { .. } => ErrorKind::ManifestFetchFailure,
                RegistryError::LayerFetch { .. } => ErrorKind::LayerFetchFailure,
                RegistryError::InvalidReference { .. } => ErrorKind::InvalidReference,
                RegistryError::Config(_) | RegistryError::Io(_) => ErrorKind::Config,
            },
            CoreError::Runtime(e) => match e {
                // Root directory creation and layer writes.
                RuntimeError::Extraction(_) | RuntimeError::Io(_) => ErrorKind::ExtractionFailure,
                RuntimeError::Isolation(_) | RuntimeError::BackendUnavailable(_) => {
                    ErrorKind::IsolationFailure
                }
                RuntimeError::Exec(_) => ErrorKind::ExecFailure,
            },
            // Relaying the child's output.
            CoreError::Io(_) => ErrorKind::ExecFailure,
        }
    }
}
