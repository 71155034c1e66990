//! Error taxonomy for the host process.
//!
//! Only a failure to create the host window is fatal, and that happens
//! outside this crate's responsibility. Every variant here is recovered
//! somewhere: storage failures degrade the transport, missing content
//! renders a diagnostic page, hook failures degrade the lockdown to the
//! remaining mechanisms.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = HostError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum HostError {
    /// Storage could not be opened or failed its reachability check.
    #[error("storage unavailable at {path}: {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },

    /// No UI bundle, no build output and no API server.
    #[error("UI content not found (looked in {searched:?})")]
    ContentNotFound { searched: Vec<PathBuf> },

    /// The in-process bridge could not be attached to the rendering surface.
    #[error("bridge registration failed: {0}")]
    BridgeRegistrationFailed(String),

    /// One lockdown mechanism could not be installed.
    #[error("{mechanism} install failed: {reason}")]
    HookInstallFailed {
        mechanism: &'static str,
        reason: String,
    },

    /// The global keyboard hook could not be removed at shutdown.
    #[error("{mechanism} release failed: {reason}")]
    HookReleaseFailed {
        mechanism: &'static str,
        reason: String,
    },

    /// The GL context or the engine instance could not be created.
    #[error("rendering surface init failed: {0}")]
    RenderingSurfaceInitFailed(String),

    /// The local API server failed to bind or spawn.
    #[error("local API server failed to start: {0}")]
    ServerStartFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl HostError {
    /// Whether the process may continue after this error.
    ///
    /// Every variant is recoverable at the component that raises it; the
    /// method exists so call sites can assert that contract in tests.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, HostError::HookReleaseFailed { .. })
    }
}
