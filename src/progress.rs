//! Progress-callback trait for per-diagram pipeline events.
//!
//! Inject an [`Arc<dyn MigrationProgressCallback>`] via
//! [`crate::config::MigrationConfigBuilder::progress_callback`] to receive
//! events as each phase processes diagrams.
//!
//! Workers only *emit* events. When a progress bar advances is decided by the
//! receiver, typically through a [`ProgressPolicy`]: advancing on
//! [`on_diagram_dispatched`](MigrationProgressCallback::on_diagram_dispatched)
//! reproduces the legacy tool's behaviour (the bar reaches 100 % while the
//! last calls are still in flight); advancing on completion reflects work
//! actually done.
//!
//! # Example
//!
//! ```rust
//! use diagram_migrate::{MigrationProgressCallback, Phase};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Failures(AtomicUsize);
//!
//! impl MigrationProgressCallback for Failures {
//!     fn on_diagram_error(&self, phase: Phase, name: &str, error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{phase} failed for {name}: {error}");
//!     }
//! }
//! ```

use crate::error::Phase;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Called by the pipeline as it moves diagrams through each phase.
///
/// Implementations must be `Send + Sync`: up to `concurrency` diagrams are in
/// flight at once and may report from different tasks. All methods have
/// default no-op implementations.
pub trait MigrationProgressCallback: Send + Sync {
    /// Called once when a phase starts.
    ///
    /// # Arguments
    /// * `phase` — convert or upload
    /// * `total` — number of diagrams the phase will process
    fn on_phase_start(&self, phase: Phase, total: usize) {
        let _ = (phase, total);
    }

    /// Called when a diagram acquires a slot in the phase's pool.
    fn on_diagram_dispatched(&self, phase: Phase, name: &str) {
        let _ = (phase, name);
    }

    /// Called when a diagram finishes the phase successfully.
    fn on_diagram_complete(&self, phase: Phase, name: &str) {
        let _ = (phase, name);
    }

    /// Called when a diagram fails the phase (after retries, if any).
    fn on_diagram_error(&self, phase: Phase, name: &str, error: &str) {
        let _ = (phase, name, error);
    }

    /// Called once after every diagram in the phase has settled.
    ///
    /// # Arguments
    /// * `total`     — diagrams attempted
    /// * `succeeded` — diagrams that finished without error
    fn on_phase_complete(&self, phase: Phase, total: usize, succeeded: usize) {
        let _ = (phase, total, succeeded);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl MigrationProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::MigrationConfig`].
pub type ProgressCallback = Arc<dyn MigrationProgressCallback>;

/// When a progress display should advance by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressPolicy {
    /// Advance when work for a diagram starts (legacy behaviour).
    Dispatch,
    /// Advance when a diagram settles, successfully or not. (default)
    #[default]
    Completion,
}

impl ProgressPolicy {
    /// Whether a dispatch event should advance the display.
    pub fn advances_on_dispatch(self) -> bool {
        self == ProgressPolicy::Dispatch
    }

    /// Whether a completion or error event should advance the display.
    pub fn advances_on_settle(self) -> bool {
        self == ProgressPolicy::Completion
    }
}
