//! Authenticated HTTP client for the backend API.
//!
//! DESIGN
//! ======
//! Every request reads the user store and, when a record with an identity
//! token is present, sends it in the `token` header. No stored record means
//! no header; the backend decides what an anonymous call gets.
//!
//! A 401 response ends the session: the store is cleared and the
//! [`SessionReset`] hook runs once for that response before the call returns
//! [`ApiError::Unauthorized`].

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use crate::config::HttpTimeouts;
use crate::store::UserStore;

/// Request header carrying the identity token.
pub const TOKEN_HEADER: &str = "token";
/// Profile endpoint used by the dashboard.
pub const PROFILE_PATH: &str = "/getUserProfile";

/// Invalidates the in-memory session after the backend rejects its token.
pub trait SessionReset: Send + Sync {
    fn reset(&self);
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http client build failed: {0}")]
    ClientBuild(String),
    #[error("request to {path} failed: {message}")]
    Request { path: String, message: String },
    #[error("session is no longer authorized")]
    Unauthorized,
    #[error("{path} returned status {status}")]
    Status { path: String, status: u16, body: String },
    #[error("response from {path} is not JSON: {message}")]
    Decode { path: String, message: String },
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    store: Arc<dyn UserStore>,
    reset: Arc<dyn SessionReset>,
}

impl ApiClient {
    /// # Errors
    ///
    /// Returns [`ApiError::ClientBuild`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        timeouts: HttpTimeouts,
        store: Arc<dyn UserStore>,
        reset: Arc<dyn SessionReset>,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| ApiError::ClientBuild(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { http, base_url, store, reset })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.send(Method::POST, path, Some(body)).await
    }

    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn get(&self, path: &str) -> Result<Value, ApiError> {
        self.send(Method::GET, path, None).await
    }

    /// Fetch the signed-in user's profile from the backend.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::send`].
    pub async fn fetch_user_profile(&self) -> Result<Value, ApiError> {
        self.send(Method::POST, PROFILE_PATH, None).await
    }

    /// Issue a request and decode the JSON response. An empty body decodes
    /// to `Value::Null`.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Request`] on connection or timeout failures
    /// - [`ApiError::Unauthorized`] on 401, after the session was reset
    /// - [`ApiError::Status`] on any other non-success status
    /// - [`ApiError::Decode`] if a success body is not JSON
    pub async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        let url = self.url(path);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(token) = self.token() {
            request = request.header(TOKEN_HEADER, token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let request_err = |e: reqwest::Error| ApiError::Request { path: path.to_owned(), message: e.to_string() };
        let response = request.send().await.map_err(request_err)?;
        let status = response.status().as_u16();
        tracing::debug!(%method, path, status, "api response");

        if status == 401 {
            self.invalidate_session(path);
            return Err(ApiError::Unauthorized);
        }
        let text = response.text().await.map_err(request_err)?;
        if !(200..300).contains(&status) {
            tracing::warn!(%method, path, status, "api request failed");
            return Err(ApiError::Status { path: path.to_owned(), status, body: text });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode { path: path.to_owned(), message: e.to_string() })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn token(&self) -> Option<String> {
        match self.store.read() {
            Ok(user) => user.and_then(|u| u.id_token().map(str::to_owned)),
            Err(e) => {
                tracing::warn!(error = %e, "cannot read user store; sending request without token");
                None
            }
        }
    }

    fn invalidate_session(&self, path: &str) {
        tracing::warn!(path, "backend rejected the session token; signing out locally");
        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "failed to clear the user store after 401");
        }
        self.reset.reset();
    }
}
