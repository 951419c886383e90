//! Migration entry points: sequence the pipeline stages and build the report.

use crate::config::MigrationConfig;
use crate::diagram::Diagram;
use crate::error::MigrateError;
use crate::output::{MigrationPlan, MigrationReport, PhaseStats};
use crate::pipeline::convert::convert_pending;
use crate::pipeline::records::{RecordSource, XmlDatasetSource};
use crate::pipeline::store::{Completed, CompletionStore};
use crate::pipeline::upload::upload_all;
use crate::target::{HttpFormClient, UploadClient};
use crate::vendor::{BearerToken, HttpVendorApi, VendorApi};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

/// The three external collaborators a run depends on.
#[derive(Clone)]
pub struct Services {
    pub records: Arc<dyn RecordSource>,
    pub vendor: Arc<dyn VendorApi>,
    pub target: Arc<dyn UploadClient>,
}

impl Services {
    /// XML dataset reader plus the HTTP vendor and target clients.
    pub fn http(config: &MigrationConfig) -> Result<Self, MigrateError> {
        let vendor = HttpVendorApi::new(config)
            .map_err(|e| MigrateError::Internal(format!("HTTP client for conversion API: {e}")))?;
        let target = HttpFormClient::new(config)
            .map_err(|e| MigrateError::Internal(format!("HTTP client for target: {e}")))?;
        Ok(Self {
            records: Arc::new(XmlDatasetSource::default()),
            vendor: Arc::new(vendor),
            target: Arc::new(target),
        })
    }
}

/// Migrate every diagram in the dataset at `input`.
///
/// # Returns
/// `Ok(MigrationReport)` whenever no fatal error occurred, even if some
/// diagrams failed (check [`MigrationReport::failed`]).
///
/// # Errors
/// Returns `Err(MigrateError)` for fatal errors only:
/// - vendor or target login refused
/// - dataset unreadable
/// - output directory or session file not usable
/// - overall deadline exceeded
pub async fn migrate(
    input: impl AsRef<Path>,
    config: &MigrationConfig,
) -> Result<MigrationReport, MigrateError> {
    let services = Services::http(config)?;
    migrate_with(input, config, &services).await
}

/// [`migrate`] with caller-supplied collaborators.
pub async fn migrate_with(
    input: impl AsRef<Path>,
    config: &MigrationConfig,
    services: &Services,
) -> Result<MigrationReport, MigrateError> {
    let pipeline = run(input.as_ref(), config, services);
    match config.run_timeout_secs {
        Some(secs) => timeout(Duration::from_secs(secs), pipeline)
            .await
            .map_err(|_| MigrateError::DeadlineExceeded { secs })?,
        None => pipeline.await,
    }
}

/// Load and partition the dataset without calling either remote service.
pub async fn plan(
    input: impl AsRef<Path>,
    config: &MigrationConfig,
    records: &dyn RecordSource,
) -> Result<MigrationPlan, MigrateError> {
    let diagrams = load(records, input.as_ref(), config).await?;
    let store = CompletionStore::new(&config.output_dir, &config.artifact_extension);
    let completed = store.scan().await?;
    let total_records = diagrams.len();
    let (reused, pending) = partition(diagrams, completed);

    Ok(MigrationPlan {
        total_records,
        to_convert: pending.into_iter().map(|d| d.name).collect(),
        reused: reused.into_iter().map(|d| d.name).collect(),
    })
}

async fn run(
    input: &Path,
    config: &MigrationConfig,
    services: &Services,
) -> Result<MigrationReport, MigrateError> {
    let total_start = Instant::now();
    info!("Starting migration: {}", input.display());

    // ── Step 1: Vendor token ─────────────────────────────────────────────
    let token = login(services.vendor.as_ref(), config).await?;

    // ── Step 2: Load records ─────────────────────────────────────────────
    let diagrams = load(services.records.as_ref(), input, config).await?;
    let total_records = diagrams.len();

    // ── Step 3: Partition against earlier output ─────────────────────────
    let store = CompletionStore::new(&config.output_dir, &config.artifact_extension);
    let completed = store.scan().await?;
    let (already_converted, pending) = partition(diagrams, completed);
    let skipped = already_converted.len();
    info!(
        "{} to convert, {} already converted",
        pending.len(),
        skipped
    );

    // ── Step 4: Convert ──────────────────────────────────────────────────
    let convert_start = Instant::now();
    let attempted = pending.len();
    let conversion = convert_pending(services.vendor.as_ref(), &token, pending, &store, config).await;
    let conversion_stats = PhaseStats {
        attempted,
        succeeded: conversion.converted.len(),
        failed: conversion.failures.len(),
        duration_ms: convert_start.elapsed().as_millis() as u64,
    };
    info!(
        "Converted {}/{} diagrams in {}ms",
        conversion_stats.succeeded, attempted, conversion_stats.duration_ms
    );

    // ── Step 5: Merge (barrier) ──────────────────────────────────────────
    let reused: Vec<String> = already_converted.iter().map(|d| d.name.clone()).collect();
    let converted: Vec<String> = conversion.converted.iter().map(|d| d.name.clone()).collect();
    let mut to_upload = already_converted;
    to_upload.extend(conversion.converted);
    let mut failures = conversion.failures;

    // ── Step 6: Upload ───────────────────────────────────────────────────
    let upload_start = Instant::now();
    let attempted = to_upload.len();
    let uploaded = if to_upload.is_empty() {
        info!("Nothing to upload");
        Vec::new()
    } else {
        let outcome = upload_all(services.target.as_ref(), to_upload, config).await?;
        failures.extend(outcome.failures);
        outcome.uploaded
    };
    let upload_stats = PhaseStats {
        attempted,
        succeeded: uploaded.len(),
        failed: attempted - uploaded.len(),
        duration_ms: upload_start.elapsed().as_millis() as u64,
    };

    // ── Step 7: Report ───────────────────────────────────────────────────
    let report = MigrationReport {
        total_records,
        skipped_conversions: skipped,
        reused,
        converted,
        uploaded,
        failures,
        conversion: conversion_stats,
        upload: upload_stats,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Migration complete: {} uploaded, {} failed, {}ms total",
        report.succeeded(),
        report.failed(),
        report.total_duration_ms
    );
    Ok(report)
}

async fn login(vendor: &dyn VendorApi, config: &MigrationConfig) -> Result<BearerToken, MigrateError> {
    let service = "conversion API";
    match timeout(
        Duration::from_secs(config.api_timeout_secs),
        vendor.login(&config.vendor_credentials),
    )
    .await
    {
        Ok(Ok(token)) => {
            info!("Obtained token from {}", service);
            Ok(token)
        }
        Ok(Err(e)) => Err(MigrateError::Authentication {
            service: service.into(),
            detail: e.to_string(),
        }),
        Err(_) => Err(MigrateError::Authentication {
            service: service.into(),
            detail: format!("login timed out after {}s", config.api_timeout_secs),
        }),
    }
}

async fn load(
    records: &dyn RecordSource,
    input: &Path,
    config: &MigrationConfig,
) -> Result<Vec<Diagram>, MigrateError> {
    let mut diagrams = records.load_records(input).await?;
    if let Some(limit) = config.limit {
        if diagrams.len() > limit {
            debug!("Limiting run to the first {} of {} records", limit, diagrams.len());
            diagrams.truncate(limit);
        }
    }
    Ok(diagrams)
}

/// Split `diagrams` into {already converted, still pending}.
///
/// Already-converted diagrams are the recovered artifacts whose stem matches
/// a loaded record; artifacts no loaded record names are left out.
fn partition(diagrams: Vec<Diagram>, completed: Completed) -> (Vec<Diagram>, Vec<Diagram>) {
    let (done, pending): (Vec<Diagram>, Vec<Diagram>) =
        diagrams.into_iter().partition(|d| completed.contains(d));
    let wanted: HashSet<String> = done.iter().map(Diagram::artifact_stem).collect();
    let reused = completed
        .diagrams
        .into_iter()
        .filter(|d| wanted.contains(&d.artifact_stem()))
        .collect();
    (reused, pending)
}
