//! Result types returned by a migration run.

use crate::error::{DiagramError, MigrateError, Phase};
use serde::{Deserialize, Serialize};

/// Counters for one pipeline phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// End-of-run summary.
///
/// Returned as `Ok` whenever no fatal error occurred, even if some diagrams
/// failed; check [`MigrationReport::failed`] or call
/// [`MigrationReport::into_result`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Records loaded from the dataset (after `limit`).
    pub total_records: usize,
    /// Records whose artifact already existed, so conversion was skipped.
    pub skipped_conversions: usize,
    /// Names recovered from the output directory and queued for upload.
    pub reused: Vec<String>,
    /// Names converted during this run.
    pub converted: Vec<String>,
    /// Names whose upload succeeded.
    pub uploaded: Vec<String>,
    /// Every per-diagram failure, conversion and upload alike.
    pub failures: Vec<DiagramError>,
    pub conversion: PhaseStats,
    pub upload: PhaseStats,
    pub total_duration_ms: u64,
}

impl MigrationReport {
    /// Diagrams that made it all the way into the target application.
    pub fn succeeded(&self) -> usize {
        self.uploaded.len()
    }

    /// Diagrams that failed in either phase.
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Names that failed in `phase`.
    pub fn failed_names(&self, phase: Phase) -> Vec<&str> {
        self.failures
            .iter()
            .filter(|f| f.phase() == phase)
            .map(DiagramError::name)
            .collect()
    }

    /// Treat any per-diagram failure as an error.
    pub fn into_result(self) -> Result<Self, MigrateError> {
        if self.failures.is_empty() {
            return Ok(self);
        }
        let succeeded = self.succeeded();
        let failed = self.failed();
        Err(MigrateError::PartialFailure {
            succeeded,
            failed,
            total: succeeded + failed,
        })
    }
}

/// What a run would do, computed without touching the network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    pub total_records: usize,
    /// Names that would be sent to the conversion API.
    pub to_convert: Vec<String>,
    /// Names already converted; they would only be uploaded.
    pub reused: Vec<String>,
}

impl MigrationPlan {
    /// Diagrams the upload phase would receive if every conversion succeeded.
    pub fn upload_count(&self) -> usize {
        self.to_convert.len() + self.reused.len()
    }
}
