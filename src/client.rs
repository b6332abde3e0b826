//! HTTP client for the backend's auxiliary endpoints.
//!
//! [`ApiClient`] wraps `reqwest::Client` with a cookie store, so the
//! session cookie issued by a successful auth check rides along on later
//! requests, the same way a browser sends credentials.
//!
//! ## Endpoints
//!
//! - `POST /auth_check` — verifies the caller; response `{"ok": bool}`
//! - `GET /heartbeat` — stateless liveness probe; response
//!   `{"ok": bool, "bot_connected": bool}`
//!
//! ## Error handling
//!
//! [`ApiClient::auth_check`] is a pure boolean outcome: any transport or
//! server-level failure logs a warning and returns `false`. The raw
//! [`ClientError`] taxonomy is only visible on [`ApiClient::heartbeat`],
//! whose caller maps every failure to an unreachable verdict.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info, warn};

/// Per-process authorization flag. Created unauthorized; set only by
/// [`ApiClient::auth_check`]; read by the command gateway before every send.
pub struct Session {
    authorized: AtomicBool,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self {
            authorized: AtomicBool::new(false),
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::SeqCst)
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP client for the playback backend.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    key: Option<String>,
}

impl ApiClient {
    /// Create a client for the backend at the given base URL, with an
    /// optional credential to present on auth checks.
    #[must_use]
    pub fn new(base_url: String, key: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");
        // Strip trailing slash for consistent URL construction
        let base_url = base_url.trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            key,
        }
    }

    /// The backend's base URL (without trailing slash).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /auth_check` — verify the caller and record the verdict on the
    /// session.
    ///
    /// Safe to call repeatedly (once at startup plus once per reconnect).
    /// Never propagates an error: transport failures, non-2xx statuses and
    /// unparsable bodies all leave the session unauthorized and return
    /// `false`.
    pub async fn auth_check(&self, session: &Session) -> bool {
        let verdict = match self.request_auth_check().await {
            Ok(ok) => {
                if ok {
                    info!("authenticated");
                } else {
                    info!("not authenticated");
                }
                ok
            }
            Err(e) => {
                warn!("auth check failed: {e}");
                false
            }
        };
        session.set_authorized(verdict);
        verdict
    }

    async fn request_auth_check(&self) -> Result<bool, ClientError> {
        let body = match &self.key {
            Some(key) => json!({ "key": key }),
            None => json!({}),
        };
        let resp = self
            .http
            .post(format!("{}/auth_check", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(ClientError::Request)?;
        let value = Self::handle_response(resp).await?;
        Ok(value["ok"].as_bool().unwrap_or(false))
    }

    /// `GET /heartbeat` — liveness probe, independent of socket state. The
    /// socket can be open while the backend's upstream bot process is down;
    /// this is how that distinction is detected.
    pub async fn heartbeat(&self) -> Result<HeartbeatStatus, ClientError> {
        let resp = self
            .http
            .get(format!("{}/heartbeat", self.base_url))
            .send()
            .await
            .map_err(ClientError::Request)?;
        let value = Self::handle_response(resp).await?;
        Ok(HeartbeatStatus {
            web_ok: value["ok"].as_bool().unwrap_or(false),
            bot_ok: value["bot_connected"].as_bool().unwrap_or(false),
        })
    }

    /// Parse an HTTP response — returns the JSON body on success, or a
    /// [`ClientError`] with the error message on failure.
    async fn handle_response(resp: reqwest::Response) -> Result<Value, ClientError> {
        let status = resp.status();
        let body = resp.text().await.map_err(ClientError::Request)?;

        if status.is_success() {
            serde_json::from_str(&body)
                .map_err(|e| ClientError::Protocol(format!("Invalid JSON from backend: {e}")))
        } else {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"].as_str().map(String::from))
                .unwrap_or(body);
            Err(ClientError::Backend {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Classified liveness verdict from one heartbeat probe.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatStatus {
    pub web_ok: bool,
    pub bot_ok: bool,
}

/// Errors returned by [`ApiClient`] methods.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP transport error (connection refused, timeout, DNS failure, etc.).
    Request(reqwest::Error),
    /// The backend returned a non-2xx HTTP status.
    Backend { status: u16, message: String },
    /// The response body was not valid JSON.
    Protocol(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Backend { status, message } => {
                write!(f, "Backend error (HTTP {}): {}", status, message)
            }
            ClientError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}
