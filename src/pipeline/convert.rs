//! Converter stage: modernise pending diagrams through the vendor API.
//!
//! At most `convert_concurrency` calls are in flight; a diagram waits for a
//! semaphore permit before it is dispatched and the permit is dropped when its
//! future finishes, whatever the outcome.
//!
//! ## Retry Strategy
//!
//! Transport errors, `429`, `5xx` and per-call timeouts are retried with
//! exponential backoff (`retry_backoff_ms * 2^(attempt-1)`). A response that
//! is not a single-entry zip or a `4xx` fails immediately: sending the same
//! payload again would get the same answer.

use crate::config::MigrationConfig;
use crate::diagram::Diagram;
use crate::error::{DiagramError, Phase, ServiceError};
use crate::pipeline::store::CompletionStore;
use crate::vendor::{BearerToken, VendorApi};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Diagrams converted in this run plus the ones that failed.
#[derive(Debug, Default)]
pub struct ConversionOutcome {
    pub converted: Vec<Diagram>,
    pub failures: Vec<DiagramError>,
}

/// Convert every diagram in `pending`, checkpointing each success in `store`.
///
/// Never fails as a whole: a diagram that cannot be converted is reported in
/// [`ConversionOutcome::failures`] and its siblings carry on.
pub async fn convert_pending(
    vendor: &dyn VendorApi,
    token: &BearerToken,
    pending: Vec<Diagram>,
    store: &CompletionStore,
    config: &MigrationConfig,
) -> ConversionOutcome {
    let total = pending.len();
    let cb = config.progress_callback.as_ref();
    if let Some(cb) = cb {
        cb.on_phase_start(Phase::Convert, total);
    }

    let gate = Semaphore::new(config.convert_concurrency);
    let gate = &gate;
    let results = join_all(pending.into_iter().map(|diagram| async move {
        let _permit = gate.acquire().await.map_err(|_| DiagramError::Conversion {
            name: diagram.name.clone(),
            retries: 0,
            detail: "conversion pool closed".into(),
        })?;
        if let Some(cb) = cb {
            cb.on_diagram_dispatched(Phase::Convert, &diagram.name);
        }

        let result = convert_one(vendor, token, &diagram, store, config).await;

        if let Some(cb) = cb {
            match &result {
                Ok(_) => cb.on_diagram_complete(Phase::Convert, &diagram.name),
                Err(e) => cb.on_diagram_error(Phase::Convert, &diagram.name, &e.to_string()),
            }
        }
        result
    }))
    .await;

    let mut outcome = ConversionOutcome::default();
    for result in results {
        match result {
            Ok(d) => outcome.converted.push(d),
            Err(e) => {
                warn!(name = %e.name(), phase = %Phase::Convert, "{}", e);
                outcome.failures.push(e);
            }
        }
    }

    if let Some(cb) = cb {
        cb.on_phase_complete(Phase::Convert, total, outcome.converted.len());
    }
    outcome
}

/// Why a single attempt failed.
enum AttemptError {
    Service(ServiceError),
    TimedOut,
}

impl AttemptError {
    fn is_transient(&self) -> bool {
        match self {
            AttemptError::Service(e) => e.is_transient(),
            AttemptError::TimedOut => true,
        }
    }
}

/// Upper bound on a single retry delay.
const MAX_BACKOFF_MS: u64 = 60_000;

/// Delay before retry number `attempt` (1-based), doubling each time and
/// capped at [`MAX_BACKOFF_MS`].
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

/// Convert one diagram with retries, then write its checkpoint.
async fn convert_one(
    vendor: &dyn VendorApi,
    token: &BearerToken,
    diagram: &Diagram,
    store: &CompletionStore,
    config: &MigrationConfig,
) -> Result<Diagram, DiagramError> {
    let call_timeout = Duration::from_secs(config.api_timeout_secs);
    let mut attempt = 0u32;

    let payload = loop {
        let result = match timeout(call_timeout, vendor.modernize(token, &diagram.payload)).await {
            Ok(r) => r.map_err(AttemptError::Service),
            Err(_) => Err(AttemptError::TimedOut),
        };

        match result {
            Ok(bytes) => break bytes,
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                let backoff = backoff_ms(config.retry_backoff_ms, attempt);
                warn!(
                    name = %diagram.name,
                    attempt,
                    max_retries = config.max_retries,
                    backoff_ms = backoff,
                    "Retrying conversion"
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            Err(AttemptError::TimedOut) => {
                return Err(DiagramError::Timeout {
                    name: diagram.name.clone(),
                    phase: Phase::Convert,
                    secs: config.api_timeout_secs,
                })
            }
            Err(AttemptError::Service(e)) => {
                return Err(DiagramError::Conversion {
                    name: diagram.name.clone(),
                    retries: attempt,
                    detail: e.to_string(),
                })
            }
        }
    };

    let converted = diagram.with_payload(payload);
    store
        .write(&converted)
        .await
        .map_err(|e| DiagramError::Checkpoint {
            name: diagram.name.clone(),
            detail: e.to_string(),
        })?;
    debug!(name = %diagram.name, bytes = converted.payload.len(), "Converted");
    Ok(converted)
}
