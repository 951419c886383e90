//! Conversion API client.
//!
//! Two calls make up the vendor surface:
//!
//! ```text
//! POST <base>/vendor/token/v1              {"username", "password"}  → token
//! POST <base>/vendor/diagram/v1/modernize  Bearer <token>, raw bytes → zip
//! ```
//!
//! The modernize response is a zip archive holding exactly one entry, the
//! converted diagram. [`extract_single_entry`] enforces that shape.

use crate::config::{Credentials, MigrationConfig};
use crate::error::ServiceError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::io::{Cursor, Read};
use std::time::Duration;
use tracing::debug;

pub const TOKEN_PATH: &str = "vendor/token/v1";
pub const MODERNIZE_PATH: &str = "vendor/diagram/v1/modernize";

/// Largest converted diagram accepted from an archive (64 MiB).
pub const MAX_ENTRY_BYTES: u64 = 64 << 20;

/// Bearer token issued by the vendor login.
///
/// Obtained once per run and passed by reference to every conversion call.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

/// The remote conversion service.
#[async_trait]
pub trait VendorApi: Send + Sync {
    /// Exchange credentials for a bearer token.
    async fn login(&self, credentials: &Credentials) -> Result<BearerToken, ServiceError>;

    /// Convert one legacy payload; returns the converted bytes.
    async fn modernize(&self, token: &BearerToken, payload: &[u8]) -> Result<Vec<u8>, ServiceError>;
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// [`VendorApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpVendorApi {
    client: reqwest::Client,
    token_url: String,
    modernize_url: String,
}

impl HttpVendorApi {
    pub fn new(config: &MigrationConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            token_url: config.vendor_endpoint(TOKEN_PATH),
            modernize_url: config.vendor_endpoint(MODERNIZE_PATH),
        })
    }
}

#[async_trait]
impl VendorApi for HttpVendorApi {
    async fn login(&self, credentials: &Credentials) -> Result<BearerToken, ServiceError> {
        let response = self
            .client
            .post(&self.token_url)
            .json(&TokenRequest {
                username: &credentials.username,
                password: &credentials.password,
            })
            .send()
            .await?;
        let body = checked(response).await?.text().await?;
        parse_token(&body)
    }

    async fn modernize(&self, token: &BearerToken, payload: &[u8]) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .client
            .post(&self.modernize_url)
            .bearer_auth(token.as_str())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(payload.to_vec())
            .send()
            .await?;
        let archive = checked(response).await?.bytes().await?;
        debug!("Modernize returned {} byte archive", archive.len());
        extract_single_entry(&archive)
    }
}

/// Turn a non-success status into [`ServiceError::Status`], keeping the body
/// for the diagnostic.
async fn checked(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Status {
        status: status.as_u16(),
        body: truncate(&body, 200),
    })
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\u{2026}", &s[..idx]),
        None => s.to_string(),
    }
}

/// The token endpoint answers with the bare token, sometimes JSON-quoted.
pub fn parse_token(body: &str) -> Result<BearerToken, ServiceError> {
    let token = body.trim();
    let token = token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token);
    if token.is_empty() {
        return Err(ServiceError::Rejected("token endpoint returned an empty body".into()));
    }
    Ok(BearerToken::new(token))
}

/// Read the only entry of a zip archive.
///
/// Anything other than exactly one entry is an error: the caller cannot tell
/// which of several files is the converted diagram. Entries larger than
/// [`MAX_ENTRY_BYTES`] are rejected.
pub fn extract_single_entry(archive: &[u8]) -> Result<Vec<u8>, ServiceError> {
    extract_single_entry_limited(archive, MAX_ENTRY_BYTES)
}

fn extract_single_entry_limited(archive: &[u8], limit: u64) -> Result<Vec<u8>, ServiceError> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))
        .map_err(|e| ServiceError::InvalidArchive(e.to_string()))?;
    if zip.len() != 1 {
        return Err(ServiceError::InvalidArchive(format!(
            "expected exactly one entry, found {}",
            zip.len()
        )));
    }
    let mut entry = zip
        .by_index(0)
        .map_err(|e| ServiceError::InvalidArchive(e.to_string()))?;
    let name = entry.name().to_string();

    // The declared size comes from the archive header and is only a hint.
    let mut data = Vec::with_capacity(entry.size().min(limit) as usize);
    entry
        .by_ref()
        .take(limit + 1)
        .read_to_end(&mut data)
        .map_err(|e| ServiceError::InvalidArchive(format!("reading '{name}': {e}")))?;
    if data.len() as u64 > limit {
        return Err(ServiceError::InvalidArchive(format!(
            "entry '{name}' exceeds {limit} bytes"
        )));
    }
    Ok(data)
}
