//! # diagram-migrate
//!
//! Move legacy diagrams into a target web application: convert each one
//! through a remote modernisation API, then upload the result through the
//! application's form.
//!
//! ## Pipeline Overview
//!
//! ```text
//! dataset.xml
//!  │
//!  ├─ 1. Login    vendor token, once, passed to every conversion call
//!  ├─ 2. Records  name + base64 payload per record
//!  ├─ 3. Store    skip diagrams whose artifact already exists
//!  ├─ 4. Convert  ≤5 concurrent calls; each result checkpointed to disk
//!  ├─ 5. Upload   one login, then ≤5 concurrent form submissions
//!  └─ 6. Report   uploaded / failed names per phase
//! ```
//!
//! Reruns are cheap: the output directory is the checkpoint, so only
//! diagrams that never converted are sent to the API again, while every
//! loaded record with an artifact is uploaded again.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use diagram_migrate::{migrate, Credentials, MigrationConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MigrationConfig::builder()
//!         .vendor_api("https://vendor.example.com/api")
//!         .vendor_credentials(Credentials::new("svc", "secret"))
//!         .target_url("https://records.example.gov")
//!         .target_credentials(Credentials::new("agent", "secret"))
//!         .build()?;
//!     let report = migrate("diagrams.xml", &config).await?;
//!     eprintln!("{} uploaded, {} failed", report.succeeded(), report.failed());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `diagram-migrate` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod diagram;
pub mod error;
pub mod migrate;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod target;
pub mod vendor;

#[cfg(test)]
mod test_server;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{Credentials, MigrationConfig, MigrationConfigBuilder};
pub use diagram::{sanitize_name, Diagram};
pub use error::{DiagramError, MigrateError, Phase, ServiceError};
pub use migrate::{migrate, migrate_with, plan, Services};
pub use output::{MigrationPlan, MigrationReport, PhaseStats};
pub use pipeline::records::{DatasetLayout, RecordSource, XmlDatasetSource};
pub use progress::{MigrationProgressCallback, NoopProgressCallback, ProgressCallback, ProgressPolicy};
pub use target::{HttpFormClient, SessionSnapshot, UploadClient, UploadForm};
pub use vendor::{BearerToken, HttpVendorApi, VendorApi};
