//! Uploader stage: one login, then bounded concurrent form submissions.
//!
//! 1. Authenticate once. Failure (or timeout) is fatal for the phase.
//! 2. Persist the captured [`SessionSnapshot`] to `session_state_path` and
//!    load it back; every submission is seeded from that loaded copy.
//! 3. Submit every diagram, at most `upload_concurrency` at a time.
//! 4. Close the client once all submissions have settled.

use crate::config::MigrationConfig;
use crate::diagram::Diagram;
use crate::error::{DiagramError, MigrateError, Phase};
use crate::target::{SessionSnapshot, UploadClient, UploadForm};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

/// Names uploaded in this run plus the ones that failed.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub uploaded: Vec<String>,
    pub failures: Vec<DiagramError>,
}

/// Upload every diagram in `diagrams` through `target`.
///
/// # Errors
/// Returns `Err` only for phase-level failures: login refused or timed out,
/// or the session snapshot could not be persisted. Per-diagram failures are
/// collected in [`UploadOutcome::failures`].
pub async fn upload_all(
    target: &dyn UploadClient,
    diagrams: Vec<Diagram>,
    config: &MigrationConfig,
) -> Result<UploadOutcome, MigrateError> {
    let result = run(target, diagrams, config).await;
    target.close().await;
    result
}

async fn run(
    target: &dyn UploadClient,
    diagrams: Vec<Diagram>,
    config: &MigrationConfig,
) -> Result<UploadOutcome, MigrateError> {
    let call_timeout = Duration::from_secs(config.upload_timeout_secs);

    // ── Phase 1: single login ────────────────────────────────────────────
    let session = match timeout(call_timeout, target.authenticate(&config.target_credentials)).await {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            return Err(MigrateError::Authentication {
                service: "target application".into(),
                detail: e.to_string(),
            })
        }
        Err(_) => {
            return Err(MigrateError::Authentication {
                service: "target application".into(),
                detail: format!("login timed out after {}s", config.upload_timeout_secs),
            })
        }
    };
    session.save(&config.session_state_path).await?;
    let session = SessionSnapshot::load(&config.session_state_path).await?;
    info!("Logged in to target application");

    // ── Phase 2: bounded submissions ─────────────────────────────────────
    let total = diagrams.len();
    let cb = config.progress_callback.as_ref();
    if let Some(cb) = cb {
        cb.on_phase_start(Phase::Upload, total);
    }

    let gate = Semaphore::new(config.upload_concurrency);
    let gate = &gate;
    let session = &session;
    let results = join_all(diagrams.into_iter().map(|diagram| async move {
        let name = diagram.name.clone();
        let _permit = gate.acquire().await.map_err(|_| DiagramError::Upload {
            name: name.clone(),
            detail: "upload pool closed".into(),
        })?;
        if let Some(cb) = cb {
            cb.on_diagram_dispatched(Phase::Upload, &name);
        }

        let form = UploadForm::for_diagram(diagram, config);
        let result = match timeout(call_timeout, target.submit(session, &form)).await {
            Ok(Ok(())) => Ok(name.clone()),
            Ok(Err(e)) => Err(DiagramError::Upload {
                name: name.clone(),
                detail: e.to_string(),
            }),
            Err(_) => Err(DiagramError::Timeout {
                name: name.clone(),
                phase: Phase::Upload,
                secs: config.upload_timeout_secs,
            }),
        };

        if let Some(cb) = cb {
            match &result {
                Ok(_) => cb.on_diagram_complete(Phase::Upload, &name),
                Err(e) => cb.on_diagram_error(Phase::Upload, &name, &e.to_string()),
            }
        }
        result
    }))
    .await;

    let mut outcome = UploadOutcome::default();
    for result in results {
        match result {
            Ok(name) => outcome.uploaded.push(name),
            Err(e) => {
                warn!(name = %e.name(), phase = %Phase::Upload, "{}", e);
                outcome.failures.push(e);
            }
        }
    }

    if let Some(cb) = cb {
        cb.on_phase_complete(Phase::Upload, total, outcome.uploaded.len());
    }
    Ok(outcome)
}
