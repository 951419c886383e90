//! Error types for the diagram-migrate library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`MigrateError`] — **Fatal**: the run cannot proceed at all (vendor login
//!   refused, dataset unreadable, output directory not writable, target login
//!   refused). Returned as `Err(MigrateError)` from [`crate::migrate()`].
//!
//! * [`DiagramError`] — **Non-fatal**: a single diagram failed to convert or
//!   upload while its siblings are fine. Stored inside
//!   [`crate::output::MigrationReport`] so callers can see partial success
//!   rather than losing the whole batch to one bad record.
//!
//! * [`ServiceError`] — what the remote collaborators ([`crate::vendor::VendorApi`],
//!   [`crate::target::UploadClient`]) return. The pipeline decides whether a
//!   given call site turns it into a fatal or a per-diagram error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the diagram-migrate library.
#[derive(Debug, Error)]
pub enum MigrateError {
    // ── Authentication ────────────────────────────────────────────────────
    /// Logging in to the conversion API or the target application failed.
    #[error("Authentication against {service} failed: {detail}\nCheck the credentials for this service.")]
    Authentication { service: String, detail: String },

    // ── Input ─────────────────────────────────────────────────────────────
    /// The dataset file could not be read or parsed.
    #[error("Failed to load records from '{path}': {detail}")]
    RecordLoad { path: PathBuf, detail: String },

    // ── File system ───────────────────────────────────────────────────────
    /// Output directory or session snapshot could not be created, read or written.
    #[error("File system error at '{path}': {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted session snapshot exists but is not valid JSON.
    #[error("Session snapshot '{path}' is corrupt: {detail}")]
    CorruptSession { path: PathBuf, detail: String },

    // ── Run control ───────────────────────────────────────────────────────
    /// The overall run deadline elapsed before the pipeline finished.
    #[error("Migration did not finish within {secs}s\nIncrease --run-timeout or lower the batch size with --limit.")]
    DeadlineExceeded { secs: u64 },

    /// Some diagrams migrated but at least one failed.
    ///
    /// Returned by [`crate::output::MigrationReport::into_result`] when the
    /// caller wants to treat any per-diagram failure as an error.
    #[error("{failed}/{total} diagrams failed during migration")]
    PartialFailure {
        succeeded: usize,
        failed: usize,
        total: usize,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Pipeline phase a per-diagram failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Convert,
    Upload,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Convert => f.write_str("convert"),
            Phase::Upload => f.write_str("upload"),
        }
    }
}

/// A non-fatal error for a single diagram.
///
/// The run continues; the diagram is listed as failed in the final report.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum DiagramError {
    /// The conversion call failed or its response was unusable.
    #[error("'{name}': conversion failed after {retries} retries: {detail}")]
    Conversion {
        name: String,
        retries: u32,
        detail: String,
    },

    /// The converted artifact could not be written to the output directory.
    #[error("'{name}': could not persist converted artifact: {detail}")]
    Checkpoint { name: String, detail: String },

    /// The upload form submission failed.
    #[error("'{name}': upload failed: {detail}")]
    Upload { name: String, detail: String },

    /// A single remote call exceeded its per-call timeout.
    #[error("'{name}': {phase} call timed out after {secs}s")]
    Timeout { name: String, phase: Phase, secs: u64 },
}

impl DiagramError {
    /// Name of the diagram this error belongs to.
    pub fn name(&self) -> &str {
        match self {
            DiagramError::Conversion { name, .. }
            | DiagramError::Checkpoint { name, .. }
            | DiagramError::Upload { name, .. }
            | DiagramError::Timeout { name, .. } => name,
        }
    }

    /// Phase the failure happened in.
    pub fn phase(&self) -> Phase {
        match self {
            DiagramError::Conversion { .. } | DiagramError::Checkpoint { .. } => Phase::Convert,
            DiagramError::Upload { .. } => Phase::Upload,
            DiagramError::Timeout { phase, .. } => *phase,
        }
    }
}

/// Error returned by a remote collaborator.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request never produced a response (DNS, TLS, connection reset…).
    #[error("transport error: {0}")]
    Transport(String),

    /// The conversion response was not a zip with exactly one entry.
    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    /// The server answered but the outcome is not what the flow expects
    /// (e.g. login form re-displayed, no session cookie issued).
    #[error("rejected: {0}")]
    Rejected(String),
}

impl ServiceError {
    /// Whether retrying the same call could plausibly succeed.
    ///
    /// Transport failures, `429` and `5xx` are transient; everything else is
    /// a property of the request or the payload and will fail again.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Transport(_) => true,
            ServiceError::Status { status, .. } => *status == 429 || *status >= 500,
            ServiceError::InvalidArchive(_) | ServiceError::Rejected(_) => false,
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => ServiceError::Status {
                status: status.as_u16(),
                body: e.to_string(),
            },
            None => ServiceError::Transport(e.to_string()),
        }
    }
}
