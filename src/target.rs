//! Target application client: log in once, then submit the upload form.
//!
//! The pipeline depends only on [`UploadClient`]. The login step yields a
//! [`SessionSnapshot`] (the cookies the application issued), which the
//! uploader persists and then replays for every submission. Each submission
//! is an independent request seeded from the snapshot; no state is shared
//! between concurrent uploads.
//!
//! [`HttpFormClient`] drives the application's HTML forms directly:
//!
//! ```text
//! GET  <target>            collect pre-login cookies (anti-forgery etc.)
//! POST <target>            Username, Password  → 302 + session cookie
//! GET  <Location>          follow the post-login navigation once
//! POST <target>/Agency     multipart Group, Name, File
//! ```

use crate::config::{Credentials, MigrationConfig};
use crate::diagram::{sanitize_name, Diagram};
use crate::error::{MigrateError, ServiceError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, COOKIE, LOCATION, SET_COOKIE};
use reqwest::multipart::{Form, Part};
use reqwest::redirect::Policy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub const UPLOAD_PATH: &str = "Agency";

/// One cookie captured from the target application.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
}

impl fmt::Debug for SessionCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=<redacted>", self.name)
    }
}

/// Authenticated session state, reusable by any number of submissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub cookies: Vec<SessionCookie>,
}

impl SessionSnapshot {
    /// Apply `Set-Cookie` headers: later values replace earlier ones with the
    /// same name, and an empty value deletes the cookie.
    ///
    /// Returns how many cookies were added or given a new value. Deletions
    /// and re-sends of an unchanged value do not count.
    pub fn absorb(&mut self, headers: &HeaderMap) -> usize {
        let mut issued = 0;
        for raw in headers.get_all(SET_COOKIE) {
            let Some((name, value)) = raw.to_str().ok().and_then(parse_set_cookie) else {
                continue;
            };
            let existing = self.cookies.iter().position(|c| c.name == name);
            match existing {
                Some(i) if value.is_empty() => {
                    self.cookies.remove(i);
                }
                Some(i) => {
                    if self.cookies[i].value != value {
                        self.cookies[i].value = value;
                        issued += 1;
                    }
                }
                None if value.is_empty() => {}
                None => {
                    self.cookies.push(SessionCookie { name, value });
                    issued += 1;
                }
            }
        }
        issued
    }

    /// Value for a `Cookie` request header.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Persist to `path` as JSON, creating parent directories.
    pub async fn save(&self, path: &Path) -> Result<(), MigrateError> {
        let fs_err = |source: std::io::Error| MigrateError::Filesystem {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(fs_err)?;
        }
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| MigrateError::Internal(format!("serialise session: {e}")))?;
        tokio::fs::write(path, json).await.map_err(fs_err)?;
        debug!("Session snapshot saved to {}", path.display());
        Ok(())
    }

    /// Load a snapshot previously written by [`SessionSnapshot::save`].
    pub async fn load(path: &Path) -> Result<Self, MigrateError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| MigrateError::Filesystem {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_slice(&bytes).map_err(|e| MigrateError::CorruptSession {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }
}

/// `name=value; Path=/; HttpOnly` → `(name, value)`.
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Values for one submission of the upload form.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadForm {
    pub group: String,
    /// Diagram name with path separators replaced, so the application does
    /// not read it as a nested folder.
    pub name: String,
    pub file_name: String,
    pub mime_type: String,
    pub payload: Vec<u8>,
}

impl UploadForm {
    pub fn for_diagram(diagram: Diagram, config: &MigrationConfig) -> Self {
        Self {
            group: config.upload_group.clone(),
            name: sanitize_name(&diagram.name),
            file_name: config.upload_file_name.clone(),
            mime_type: config.upload_mime_type.clone(),
            payload: diagram.payload,
        }
    }
}

impl fmt::Debug for UploadForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadForm")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("payload", &format_args!("<{} bytes>", self.payload.len()))
            .finish()
    }
}

/// The target application's login and upload surface.
#[async_trait]
pub trait UploadClient: Send + Sync {
    /// Log in and capture the resulting session.
    async fn authenticate(&self, credentials: &Credentials) -> Result<SessionSnapshot, ServiceError>;

    /// Submit one diagram using a previously captured session.
    async fn submit(&self, session: &SessionSnapshot, form: &UploadForm) -> Result<(), ServiceError>;

    /// Release whatever the client holds. Called once after every upload settled.
    async fn close(&self) {}
}

/// [`UploadClient`] that posts the application's HTML forms over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFormClient {
    client: reqwest::Client,
    login_url: String,
    upload_url: String,
}

impl HttpFormClient {
    pub fn new(config: &MigrationConfig) -> Result<Self, ServiceError> {
        // Redirects are handled by hand: the login redirect carries the
        // session cookie we need to capture.
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .timeout(Duration::from_secs(config.upload_timeout_secs))
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            login_url: config.target_url.clone(),
            upload_url: config.target_endpoint(UPLOAD_PATH),
        })
    }

    /// Whether a redirect to `location` (relative to `base`) lands on a login
    /// page, meaning the session was not accepted.
    fn is_login_redirect(&self, base: &str, location: &str) -> bool {
        let Some(url) = resolve(base, location) else {
            return false;
        };
        let path = url.path().trim_end_matches('/').to_ascii_lowercase();
        let login_path = reqwest::Url::parse(&self.login_url)
            .map(|u| u.path().trim_end_matches('/').to_ascii_lowercase())
            .unwrap_or_default();
        (!login_path.is_empty() && path == login_path) || path.contains("login")
    }
}

fn resolve(base: &str, location: &str) -> Option<reqwest::Url> {
    reqwest::Url::parse(base).ok()?.join(location).ok()
}

#[async_trait]
impl UploadClient for HttpFormClient {
    async fn authenticate(&self, credentials: &Credentials) -> Result<SessionSnapshot, ServiceError> {
        let mut session = SessionSnapshot::default();

        let page = self.client.get(&self.login_url).send().await?;
        ensure_ok_or_redirect(page.status())?;
        session.absorb(page.headers());

        let response = self
            .client
            .post(&self.login_url)
            .header(COOKIE, session.cookie_header())
            .form(&[
                ("Username", credentials.username.as_str()),
                ("Password", credentials.password.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        ensure_ok_or_redirect(status)?;
        let issued = session.absorb(response.headers());
        if issued == 0 {
            return Err(ServiceError::Rejected(
                "login did not issue a session cookie (wrong credentials?)".into(),
            ));
        }

        // Complete the post-login navigation; some applications set their
        // final auth cookie on the landing page.
        if status.is_redirection() {
            let target = response
                .headers()
                .get(LOCATION)
                .and_then(|l| l.to_str().ok())
                .and_then(|l| resolve(&self.login_url, l));
            if let Some(url) = target {
                let landing = self
                    .client
                    .get(url)
                    .header(COOKIE, session.cookie_header())
                    .send()
                    .await?;
                ensure_ok_or_redirect(landing.status())?;
                session.absorb(landing.headers());
            }
        }

        info!("Logged in to target; {} session cookies captured", session.cookies.len());
        Ok(session)
    }

    async fn submit(&self, session: &SessionSnapshot, form: &UploadForm) -> Result<(), ServiceError> {
        let file = Part::bytes(form.payload.clone())
            .file_name(form.file_name.clone())
            .mime_str(&form.mime_type)
            .map_err(|e| ServiceError::Rejected(format!("bad MIME type '{}': {e}", form.mime_type)))?;
        let body = Form::new()
            .text("Group", form.group.clone())
            .text("Name", form.name.clone())
            .part("File", file);

        let response = self
            .client
            .post(&self.upload_url)
            .header(COOKIE, session.cookie_header())
            .multipart(body)
            .send()
            .await?;
        let status = response.status();
        ensure_ok_or_redirect(status)?;
        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|l| l.to_str().ok())
                .unwrap_or_default();
            if self.is_login_redirect(&self.upload_url, location) {
                return Err(ServiceError::Rejected(format!(
                    "session not accepted, redirected to {location}"
                )));
            }
        }
        debug!(name = %form.name, %status, "Submitted upload form");
        Ok(())
    }
}

fn ensure_ok_or_redirect(status: reqwest::StatusCode) -> Result<(), ServiceError> {
    if status.is_success() || status.is_redirection() {
        Ok(())
    } else {
        Err(ServiceError::Status {
            status: status.as_u16(),
            body: status.canonical_reason().unwrap_or_default().to_string(),
        })
    }
}
