//! Integration tests for the full migration pipeline.
//!
//! The dataset reader, conversion API and target application are replaced by
//! in-process fakes, so these run offline. Concurrency is observed with
//! high-water-mark counters on the fakes.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use diagram_migrate::{
    migrate_with, plan, BearerToken, Credentials, Diagram, DiagramError, MigrateError,
    MigrationConfig, MigrationProgressCallback, Phase, RecordSource, ServiceError, Services,
    SessionSnapshot, UploadClient, UploadForm, VendorApi,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Tracks how many calls are in flight and the highest value ever seen.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct StaticRecords(Vec<Diagram>);

#[async_trait]
impl RecordSource for StaticRecords {
    async fn load_records(&self, _path: &Path) -> Result<Vec<Diagram>, MigrateError> {
        Ok(self.0.clone())
    }
}

/// Conversion API that prefixes every payload with `modern:`.
/// Payloads starting with `bad` are rejected.
#[derive(Default)]
struct FakeVendor {
    refuse_login: bool,
    delay: Duration,
    gauge: Gauge,
    calls: AtomicUsize,
}

#[async_trait]
impl VendorApi for FakeVendor {
    async fn login(&self, creds: &Credentials) -> Result<BearerToken, ServiceError> {
        if self.refuse_login {
            return Err(ServiceError::Status {
                status: 401,
                body: "invalid credentials".into(),
            });
        }
        assert_eq!(creds.username, "svc");
        Ok(BearerToken::new("tok-123"))
    }

    async fn modernize(&self, token: &BearerToken, payload: &[u8]) -> Result<Vec<u8>, ServiceError> {
        assert_eq!(token.as_str(), "tok-123");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        self.gauge.exit();

        if payload.starts_with(b"bad") {
            return Err(ServiceError::Rejected("unsupported diagram".into()));
        }
        let mut out = b"modern:".to_vec();
        out.extend_from_slice(payload);
        Ok(out)
    }
}

#[derive(Default)]
struct FakeTarget {
    refuse_login: bool,
    delay: Duration,
    gauge: Gauge,
    logins: AtomicUsize,
    forms: Mutex<Vec<UploadForm>>,
}

impl FakeTarget {
    fn uploaded(&self) -> Vec<UploadForm> {
        let mut forms = self.forms.lock().unwrap().clone();
        forms.sort_by(|a, b| a.name.cmp(&b.name));
        forms
    }
}

#[async_trait]
impl UploadClient for FakeTarget {
    async fn authenticate(&self, creds: &Credentials) -> Result<SessionSnapshot, ServiceError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.refuse_login {
            return Err(ServiceError::Rejected("login form redisplayed".into()));
        }
        assert_eq!(creds.username, "agent");
        Ok(SessionSnapshot::default())
    }

    async fn submit(&self, _session: &SessionSnapshot, form: &UploadForm) -> Result<(), ServiceError> {
        self.gauge.enter();
        tokio::time::sleep(self.delay).await;
        self.gauge.exit();
        self.forms.lock().unwrap().push(form.clone());
        Ok(())
    }
}

#[derive(Default)]
struct CountingProgress {
    phases: Mutex<Vec<(Phase, usize)>>,
    completed: AtomicUsize,
    errors: AtomicUsize,
}

impl MigrationProgressCallback for CountingProgress {
    fn on_phase_start(&self, phase: Phase, total: usize) {
        self.phases.lock().unwrap().push((phase, total));
    }
    fn on_diagram_complete(&self, _phase: Phase, _name: &str) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_diagram_error(&self, _phase: Phase, _name: &str, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn diagrams(names: &[&str]) -> Vec<Diagram> {
    names
        .iter()
        .map(|n| Diagram::new(*n, format!("legacy-{n}").into_bytes()))
        .collect()
}

fn config_in(dir: &Path) -> diagram_migrate::MigrationConfigBuilder {
    MigrationConfig::builder()
        .vendor_api("http://vendor.test/api")
        .vendor_credentials(Credentials::new("svc", "vendor-pw"))
        .target_url("http://target.test")
        .target_credentials(Credentials::new("agent", "target-pw"))
        .output_dir(dir.join("converted"))
        .session_state_path(dir.join("state.json"))
        .retry_backoff_ms(1)
}

fn services(records: Vec<Diagram>, vendor: &Arc<FakeVendor>, target: &Arc<FakeTarget>) -> Services {
    Services {
        records: Arc::new(StaticRecords(records)),
        vendor: vendor.clone(),
        target: target.clone(),
    }
}

fn artifacts(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir.join("converted"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_diagrams_are_converted_and_uploaded() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = Arc::new(FakeVendor::default());
    let target = Arc::new(FakeTarget::default());
    let config = config_in(dir.path()).build().unwrap();

    let report = migrate_with(
        "dataset.xml",
        &config,
        &services(diagrams(&["Exit 4", "Main St"]), &vendor, &target),
    )
    .await
    .unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 0);
    assert!(report.is_complete_success());
    assert_eq!(artifacts(dir.path()), ["Exit 4.sce", "Main St.sce"]);
    assert_eq!(target.logins.load(Ordering::SeqCst), 1);
    assert!(dir.path().join("state.json").exists());
}

#[tokio::test]
async fn uploaded_bytes_match_the_checkpointed_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = Arc::new(FakeVendor::default());
    let target = Arc::new(FakeTarget::default());
    let config = config_in(dir.path()).build().unwrap();

    migrate_with(
        "dataset.xml",
        &config,
        &services(diagrams(&["Main St"]), &vendor, &target),
    )
    .await
    .unwrap();

    let on_disk = std::fs::read(dir.path().join("converted/Main St.sce")).unwrap();
    assert_eq!(on_disk, b"modern:legacy-Main St");

    let forms = target.uploaded();
    assert_eq!(forms.len(), 1);
    assert_eq!(forms[0].payload, on_disk);
    assert_eq!(forms[0].name, "Main St");
    assert_eq!(forms[0].group, "Templates");
    assert_eq!(forms[0].file_name, "template.sce");
}

#[tokio::test]
async fn separators_in_names_are_sanitized_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = Arc::new(FakeVendor::default());
    let target = Arc::new(FakeTarget::default());
    let config = config_in(dir.path()).build().unwrap();

    migrate_with(
        "dataset.xml",
        &config,
        &services(diagrams(&["Exit 4/North"]), &vendor, &target),
    )
    .await
    .unwrap();

    assert_eq!(artifacts(dir.path()), ["Exit 4-North.sce"]);
    assert_eq!(target.uploaded()[0].name, "Exit 4-North");
}

#[tokio::test]
async fn concurrency_never_exceeds_the_configured_cap() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = Arc::new(FakeVendor {
        delay: Duration::from_millis(20),
        ..Default::default()
    });
    let target = Arc::new(FakeTarget {
        delay: Duration::from_millis(20),
        ..Default::default()
    });
    let names: Vec<String> = (0..24).map(|i| format!("diagram-{i:02}")).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let config = config_in(dir.path()).build().unwrap();

    let report = migrate_with("dataset.xml", &config, &services(diagrams(&names), &vendor, &target))
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 24);
    assert!(vendor.gauge.peak() <= 5, "conversion peak {}", vendor.gauge.peak());
    assert!(target.gauge.peak() <= 5, "upload peak {}", target.gauge.peak());
    assert!(vendor.gauge.peak() > 1, "conversions ran sequentially");
    assert!(target.gauge.peak() > 1, "uploads ran sequentially");
}

#[tokio::test]
async fn lower_caps_are_honoured() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = Arc::new(FakeVendor {
        delay: Duration::from_millis(10),
        ..Default::default()
    });
    let target = Arc::new(FakeTarget {
        delay: Duration::from_millis(10),
        ..Default::default()
    });
    let names: Vec<String> = (0..10).map(|i| format!("d{i}")).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let config = config_in(dir.path())
        .convert_concurrency(2)
        .upload_concurrency(1)
        .build()
        .unwrap();

    migrate_with("dataset.xml", &config, &services(diagrams(&names), &vendor, &target))
        .await
        .unwrap();

    assert!(vendor.gauge.peak() <= 2);
    assert_eq!(target.gauge.peak(), 1);
}

#[tokio::test]
async fn rerun_skips_conversion_but_uploads_everything_again() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path()).build().unwrap();
    let records = diagrams(&["Exit 4", "Main St"]);

    let first_vendor = Arc::new(FakeVendor::default());
    let first_target = Arc::new(FakeTarget::default());
    migrate_with("dataset.xml", &config, &services(records.clone(), &first_vendor, &first_target))
        .await
        .unwrap();
    assert_eq!(first_vendor.calls.load(Ordering::SeqCst), 2);

    let vendor = Arc::new(FakeVendor::default());
    let target = Arc::new(FakeTarget::default());
    let report = migrate_with("dataset.xml", &config, &services(records, &vendor, &target))
        .await
        .unwrap();

    assert_eq!(vendor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(report.skipped_conversions, 2);
    assert!(report.converted.is_empty());
    assert_eq!(report.reused.len(), 2);
    assert_eq!(target.uploaded().len(), 2);
    assert_eq!(target.uploaded()[0].payload, b"modern:legacy-Exit 4");
}

#[tokio::test]
async fn rerun_converts_only_what_is_missing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path()).build().unwrap();
    std::fs::create_dir_all(dir.path().join("converted")).unwrap();
    std::fs::write(dir.path().join("converted/Exit 4.sce"), b"earlier").unwrap();

    let vendor = Arc::new(FakeVendor::default());
    let target = Arc::new(FakeTarget::default());
    let report = migrate_with(
        "dataset.xml",
        &config,
        &services(diagrams(&["Exit 4", "Main St"]), &vendor, &target),
    )
    .await
    .unwrap();

    assert_eq!(vendor.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.converted, ["Main St"]);
    assert_eq!(report.reused, ["Exit 4"]);
    let forms = target.uploaded();
    assert_eq!(forms.len(), 2);
    assert_eq!(forms[0].payload, b"earlier");
}

#[tokio::test]
async fn failed_conversion_does_not_affect_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = Arc::new(FakeVendor::default());
    let target = Arc::new(FakeTarget::default());
    let progress = Arc::new(CountingProgress::default());
    let config = config_in(dir.path())
        .progress_callback(progress.clone())
        .build()
        .unwrap();
    let mut records = diagrams(&["a", "c"]);
    records.push(Diagram::new("b", b"bad-payload".to_vec()));

    let report = migrate_with("dataset.xml", &config, &services(records, &vendor, &target))
        .await
        .unwrap();

    assert_eq!(report.succeeded(), 2);
    assert_eq!(report.failed(), 1);
    assert!(!report.is_complete_success());
    assert_eq!(report.failed_names(Phase::Convert), ["b"]);
    assert!(matches!(
        report.failures[0],
        DiagramError::Conversion { retries: 0, .. }
    ));
    assert_eq!(artifacts(dir.path()), ["a.sce", "c.sce"]);
    let uploaded: HashSet<String> = target.uploaded().into_iter().map(|f| f.name).collect();
    assert_eq!(uploaded, HashSet::from(["a".to_string(), "c".to_string()]));

    assert_eq!(
        *progress.phases.lock().unwrap(),
        [(Phase::Convert, 3), (Phase::Upload, 2)]
    );
    assert_eq!(progress.completed.load(Ordering::SeqCst), 4);
    assert_eq!(progress.errors.load(Ordering::SeqCst), 1);

    assert!(matches!(
        report.into_result(),
        Err(MigrateError::PartialFailure { succeeded: 2, failed: 1, .. })
    ));
}

#[tokio::test]
async fn refused_vendor_login_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = Arc::new(FakeVendor {
        refuse_login: true,
        ..Default::default()
    });
    let target = Arc::new(FakeTarget::default());
    let config = config_in(dir.path()).build().unwrap();

    let err = migrate_with("dataset.xml", &config, &services(diagrams(&["a"]), &vendor, &target))
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::Authentication { .. }), "got: {err}");
    assert_eq!(vendor.calls.load(Ordering::SeqCst), 0);
    assert_eq!(target.logins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn refused_target_login_is_fatal_but_keeps_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = Arc::new(FakeVendor::default());
    let target = Arc::new(FakeTarget {
        refuse_login: true,
        ..Default::default()
    });
    let config = config_in(dir.path()).build().unwrap();

    let err = migrate_with(
        "dataset.xml",
        &config,
        &services(diagrams(&["a", "b"]), &vendor, &target),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, MigrateError::Authentication { .. }), "got: {err}");
    assert!(target.uploaded().is_empty());
    assert_eq!(artifacts(dir.path()), ["a.sce", "b.sce"]);
}

#[tokio::test]
async fn nothing_to_upload_skips_the_target_entirely() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = Arc::new(FakeVendor::default());
    let target = Arc::new(FakeTarget::default());
    let config = config_in(dir.path()).build().unwrap();

    let report = migrate_with("dataset.xml", &config, &services(Vec::new(), &vendor, &target))
        .await
        .unwrap();

    assert_eq!(report.total_records, 0);
    assert!(report.is_complete_success());
    assert_eq!(target.logins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn run_deadline_aborts_a_stuck_migration() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = Arc::new(FakeVendor {
        delay: Duration::from_secs(30),
        ..Default::default()
    });
    let target = Arc::new(FakeTarget::default());
    let config = config_in(dir.path())
        .run_timeout_secs(Some(1))
        .build()
        .unwrap();

    let err = migrate_with("dataset.xml", &config, &services(diagrams(&["a"]), &vendor, &target))
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::DeadlineExceeded { secs: 1 }), "got: {err}");
}

#[tokio::test]
async fn limit_processes_only_the_first_records() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = Arc::new(FakeVendor::default());
    let target = Arc::new(FakeTarget::default());
    let config = config_in(dir.path()).limit(Some(2)).build().unwrap();

    let report = migrate_with(
        "dataset.xml",
        &config,
        &services(diagrams(&["a", "b", "c", "d"]), &vendor, &target),
    )
    .await
    .unwrap();

    assert_eq!(report.total_records, 2);
    assert_eq!(vendor.calls.load(Ordering::SeqCst), 2);
    assert_eq!(artifacts(dir.path()), ["a.sce", "b.sce"]);
    let uploaded: Vec<String> = target.uploaded().into_iter().map(|f| f.name).collect();
    assert_eq!(uploaded, ["a", "b"]);
}

#[tokio::test]
async fn upload_set_follows_the_loaded_records() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("converted")).unwrap();
    for name in ["a", "b", "c", "orphan"] {
        std::fs::write(dir.path().join(format!("converted/{name}.sce")), b"done").unwrap();
    }
    let vendor = Arc::new(FakeVendor::default());
    let target = Arc::new(FakeTarget::default());
    let config = config_in(dir.path()).limit(Some(1)).build().unwrap();

    let report = migrate_with(
        "dataset.xml",
        &config,
        &services(diagrams(&["a", "b", "c"]), &vendor, &target),
    )
    .await
    .unwrap();

    assert_eq!(report.total_records, 1);
    assert_eq!(report.skipped_conversions, 1);
    assert_eq!(report.reused, ["a"]);
    assert_eq!(report.uploaded, ["a"]);
    assert_eq!(vendor.calls.load(Ordering::SeqCst), 0);
    let uploaded: Vec<String> = target.uploaded().into_iter().map(|f| f.name).collect();
    assert_eq!(uploaded, ["a"]);
}

#[tokio::test]
async fn plan_reports_work_without_calling_services() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path()).build().unwrap();
    std::fs::create_dir_all(dir.path().join("converted")).unwrap();
    std::fs::write(dir.path().join("converted/a.sce"), b"done").unwrap();
    std::fs::write(dir.path().join("converted/orphan.sce"), b"done").unwrap();

    let records = StaticRecords(diagrams(&["a", "b", "c"]));
    let plan = plan("dataset.xml", &config, &records).await.unwrap();

    assert_eq!(plan.total_records, 3);
    assert_eq!(plan.to_convert, ["b", "c"]);
    assert_eq!(plan.reused, ["a"]);
    assert_eq!(plan.upload_count(), 3);
}

#[tokio::test]
async fn report_serialises_to_json() {
    let dir = tempfile::tempdir().unwrap();
    let vendor = Arc::new(FakeVendor::default());
    let target = Arc::new(FakeTarget::default());
    let config = config_in(dir.path()).build().unwrap();
    let mut records = diagrams(&["a"]);
    records.push(Diagram::new("b", b"bad".to_vec()));

    let report = migrate_with("dataset.xml", &config, &services(records, &vendor, &target))
        .await
        .unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["uploaded"], serde_json::json!(["a"]));
    assert_eq!(json["failures"].as_array().unwrap().len(), 1);
}
