//! Configuration types for a migration run.
//!
//! Every knob lives in [`MigrationConfig`], built through
//! [`MigrationConfigBuilder`]. Defaults reproduce the legacy tool's fixed
//! values (five-wide pools, `Templates` group, `template.sce` attachment).

use crate::error::MigrateError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;

/// Username/password pair for one of the two remote services.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Configuration for a migration run.
///
/// # Example
/// ```rust
/// use diagram_migrate::{Credentials, MigrationConfig};
///
/// let config = MigrationConfig::builder()
///     .vendor_api("https://vendor.example.com/api")
///     .vendor_credentials(Credentials::new("svc", "secret"))
///     .target_url("https://target.example.com")
///     .target_credentials(Credentials::new("agent", "secret"))
///     .convert_concurrency(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.upload_concurrency, 5);
/// ```
#[derive(Clone)]
pub struct MigrationConfig {
    /// Base URL of the conversion API. Token and modernize paths are appended.
    pub vendor_api: String,

    /// Credentials for `POST <vendor_api>/vendor/token/v1`.
    pub vendor_credentials: Credentials,

    /// Base URL of the target web application (its login page).
    pub target_url: String,

    /// Credentials for the target application's login form.
    pub target_credentials: Credentials,

    /// Directory holding one converted artifact per diagram. Default: `converted`.
    ///
    /// This directory is the resumability checkpoint: anything found here is
    /// not sent to the conversion API again.
    pub output_dir: PathBuf,

    /// Extension of artifact files in `output_dir`. Default: `sce`.
    pub artifact_extension: String,

    /// Where the captured target session is persisted. Default: `state.json`.
    pub session_state_path: PathBuf,

    /// Maximum in-flight conversion calls. Default: 5.
    pub convert_concurrency: usize,

    /// Maximum in-flight upload submissions. Default: 5.
    pub upload_concurrency: usize,

    /// Retry attempts for a transient conversion failure. Default: 2.
    ///
    /// Only transport errors, `429` and `5xx` are retried; a malformed archive
    /// or a `4xx` fails the diagram immediately.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled after each attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per conversion-call timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Per authentication / upload-submission timeout in seconds. Default: 60.
    pub upload_timeout_secs: u64,

    /// Deadline for the whole run in seconds. Default: 3600. `None` disables it.
    pub run_timeout_secs: Option<u64>,

    /// Value of the upload form's group field. Default: `Templates`.
    pub upload_group: String,

    /// File name declared for the uploaded attachment. Default: `template.sce`.
    pub upload_file_name: String,

    /// MIME type declared for the uploaded attachment. Default: `application/octet-stream`.
    pub upload_mime_type: String,

    /// Only process the first `limit` records of the dataset. Default: all.
    pub limit: Option<usize>,

    /// Receiver for per-diagram progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            vendor_api: String::new(),
            vendor_credentials: Credentials::default(),
            target_url: String::new(),
            target_credentials: Credentials::default(),
            output_dir: PathBuf::from("converted"),
            artifact_extension: "sce".to_string(),
            session_state_path: PathBuf::from("state.json"),
            convert_concurrency: 5,
            upload_concurrency: 5,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            upload_timeout_secs: 60,
            run_timeout_secs: Some(3600),
            upload_group: "Templates".to_string(),
            upload_file_name: "template.sce".to_string(),
            upload_mime_type: "application/octet-stream".to_string(),
            limit: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for MigrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationConfig")
            .field("vendor_api", &self.vendor_api)
            .field("vendor_credentials", &self.vendor_credentials)
            .field("target_url", &self.target_url)
            .field("target_credentials", &self.target_credentials)
            .field("output_dir", &self.output_dir)
            .field("session_state_path", &self.session_state_path)
            .field("convert_concurrency", &self.convert_concurrency)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("upload_timeout_secs", &self.upload_timeout_secs)
            .field("run_timeout_secs", &self.run_timeout_secs)
            .field("limit", &self.limit)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn MigrationProgressCallback>"),
            )
            .finish()
    }
}

impl MigrationConfig {
    /// Create a new builder for `MigrationConfig`.
    pub fn builder() -> MigrationConfigBuilder {
        MigrationConfigBuilder {
            config: Self::default(),
        }
    }

    /// `<vendor_api>/<path>` with exactly one slash between the two.
    pub fn vendor_endpoint(&self, path: &str) -> String {
        join_url(&self.vendor_api, path)
    }

    /// `<target_url>/<path>` with exactly one slash between the two.
    pub fn target_endpoint(&self, path: &str) -> String {
        join_url(&self.target_url, path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Builder for [`MigrationConfig`].
pub struct MigrationConfigBuilder {
    config: MigrationConfig,
}

impl fmt::Debug for MigrationConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl MigrationConfigBuilder {
    pub fn vendor_api(mut self, url: impl Into<String>) -> Self {
        self.config.vendor_api = url.into();
        self
    }

    pub fn vendor_credentials(mut self, creds: Credentials) -> Self {
        self.config.vendor_credentials = creds;
        self
    }

    pub fn target_url(mut self, url: impl Into<String>) -> Self {
        self.config.target_url = url.into();
        self
    }

    pub fn target_credentials(mut self, creds: Credentials) -> Self {
        self.config.target_credentials = creds;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn artifact_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.artifact_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    pub fn session_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.session_state_path = path.into();
        self
    }

    pub fn convert_concurrency(mut self, n: usize) -> Self {
        self.config.convert_concurrency = n.max(1);
        self
    }

    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.config.upload_concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn upload_timeout_secs(mut self, secs: u64) -> Self {
        self.config.upload_timeout_secs = secs.max(1);
        self
    }

    pub fn run_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.run_timeout_secs = secs;
        self
    }

    pub fn upload_group(mut self, group: impl Into<String>) -> Self {
        self.config.upload_group = group.into();
        self
    }

    pub fn upload_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.upload_file_name = name.into();
        self
    }

    pub fn upload_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.config.upload_mime_type = mime.into();
        self
    }

    pub fn limit(mut self, n: Option<usize>) -> Self {
        self.config.limit = n;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<MigrationConfig, MigrateError> {
        let c = &self.config;
        check_url("vendor API", &c.vendor_api)?;
        check_url("target", &c.target_url)?;
        if c.convert_concurrency == 0 || c.upload_concurrency == 0 {
            return Err(MigrateError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.artifact_extension.is_empty() {
            return Err(MigrateError::InvalidConfig(
                "Artifact extension must not be empty".into(),
            ));
        }
        if c.upload_file_name.trim().is_empty() {
            return Err(MigrateError::InvalidConfig(
                "Upload file name must not be empty".into(),
            ));
        }
        if c.run_timeout_secs == Some(0) {
            return Err(MigrateError::InvalidConfig(
                "Run timeout must be ≥ 1s (omit it to disable)".into(),
            ));
        }
        Ok(self.config)
    }
}

fn check_url(what: &str, url: &str) -> Result<(), MigrateError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| MigrateError::InvalidConfig(format!("{what} URL '{url}' is invalid: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(MigrateError::InvalidConfig(format!(
            "{what} URL must be http or https, got '{other}'"
        ))),
    }
}
