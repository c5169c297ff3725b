//! Cognito user pool client for the redirect provider.
//!
//! DESIGN
//! ======
//! Talks to the Cognito Identity Provider JSON API directly: `InitiateAuth`
//! with `USER_PASSWORD_AUTH` for credential login, `GetUser` for the current
//! identity, and `GlobalSignOut` to revoke tokens. Tokens from the last
//! successful sign-in are cached in a small JSON file so a later process
//! resumes the same session, the way the browser SDK keeps tokens in local
//! storage.
//!
//! Google sign-in goes through the hosted UI. A command-line host cannot
//! receive the redirect, so [`CognitoClient::authorize_url`] produces the URL
//! to open and the session appears once the hosted UI flow completes
//! elsewhere. Wire parsing lives in pure functions for testability.

#[cfg(test)]
#[path = "cognito_test.rs"]
mod cognito_test;

use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::IdentityError;
use super::redirect::RedirectSdk;
use crate::config::{CognitoConfig, HostedUiConfig, HttpTimeouts};
use crate::user::SessionTokens;

const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const AUTH_FLOW: &str = "USER_PASSWORD_AUTH";
const NOT_AUTHORIZED: &str = "NotAuthorizedException";

// =============================================================================
// CACHED SESSION
// =============================================================================

/// Tokens persisted between processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSession {
    pub id_token: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_id: Option<String>,
}

impl CachedSession {
    fn tokens(&self) -> SessionTokens {
        SessionTokens {
            id_token: self.id_token.clone(),
            access_token: Some(self.access_token.clone()),
            login_id: self.login_id.clone(),
        }
    }
}

fn load_cache(path: &Path) -> Option<CachedSession> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot read cognito session cache");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(session) => Some(session),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cognito session cache is corrupt; ignoring");
            None
        }
    }
}

fn save_cache(path: &Path, session: Option<&CachedSession>) -> Result<(), IdentityError> {
    let io = |e: std::io::Error| IdentityError::Transport(format!("session cache {}: {e}", path.display()));
    let Some(session) = session else {
        return match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io(e)),
        };
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io)?;
    }
    let body = serde_json::to_string_pretty(session)
        .map_err(|e| IdentityError::Transport(format!("session cache encode: {e}")))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, body).map_err(io)?;
    std::fs::rename(&tmp, path).map_err(io)
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct CognitoClient {
    http: reqwest::Client,
    endpoint: String,
    client_id: String,
    hosted_ui: Option<HostedUiConfig>,
    cache_path: PathBuf,
    session: Mutex<Option<CachedSession>>,
}

impl CognitoClient {
    /// Build a client for the user pool in `config.region`, resuming any
    /// session cached at `cache_path`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: &CognitoConfig, timeouts: HttpTimeouts, cache_path: impl Into<PathBuf>) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| IdentityError::Transport(format!("http client build failed: {e}")))?;
        let cache_path = cache_path.into();
        let session = load_cache(&cache_path);
        if session.is_some() {
            tracing::debug!(path = %cache_path.display(), "resumed cached cognito session");
        }
        Ok(Self {
            http,
            endpoint: format!("https://cognito-idp.{}.amazonaws.com/", config.region),
            client_id: config.client_id.clone(),
            hosted_ui: config.hosted_ui.clone(),
            cache_path,
            session: Mutex::new(session),
        })
    }

    /// Point the client at a different API endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Hosted UI URL that starts Google sign-in, when a hosted UI is configured.
    #[must_use]
    pub fn authorize_url(&self) -> Option<String> {
        let hosted_ui = self.hosted_ui.as_ref()?;
        let bytes: [u8; 16] = rand::rng().random();
        let mut state = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            let _ = write!(state, "{b:02x}");
        }
        match build_authorize_url(hosted_ui, &self.client_id, &state) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(domain = %hosted_ui.domain, error = %e, "invalid hosted UI domain");
                None
            }
        }
    }

    fn cached(&self) -> Option<CachedSession> {
        self.session
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn replace_session(&self, session: Option<CachedSession>) -> Result<(), IdentityError> {
        let result = save_cache(&self.cache_path, session.as_ref());
        *self.session.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = session;
        result
    }

    async fn call(&self, action: &str, body: &Value) -> Result<Value, IdentityError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{action}"))
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        if status != 200 {
            let err = parse_error(status, &text);
            tracing::warn!(action, status, error = %err, "cognito request failed");
            return Err(err);
        }
        tracing::debug!(action, "cognito request succeeded");
        serde_json::from_str(&text).map_err(|e| IdentityError::Transport(format!("{action} response: {e}")))
    }
}

#[async_trait::async_trait]
impl RedirectSdk for CognitoClient {
    async fn sign_in_with_credentials(&self, identifier: &str, secret: &str) -> Result<(), IdentityError> {
        let body = json!({
            "AuthFlow": AUTH_FLOW,
            "ClientId": self.client_id,
            "AuthParameters": { "USERNAME": identifier, "PASSWORD": secret },
        });
        let response = self.call("InitiateAuth", &body).await?;
        let mut session = parse_auth_result(&response)?;
        session.login_id = Some(identifier.to_owned());
        self.replace_session(Some(session))?;
        tracing::info!(login_id = identifier, "cognito credential sign-in succeeded");
        Ok(())
    }

    async fn sign_in_interactive_redirect(&self) -> Result<(), IdentityError> {
        let url = self.authorize_url().ok_or(IdentityError::Unsupported("redirect sign-in without a hosted UI"))?;
        tracing::info!(%url, "open the hosted UI to continue Google sign-in");
        Err(IdentityError::Unsupported("redirect sign-in finishes in the browser"))
    }

    async fn sign_out_current(&self) -> Result<(), IdentityError> {
        let session = self.cached();
        self.replace_session(None)?;
        let Some(session) = session else {
            return Ok(());
        };
        self.call("GlobalSignOut", &json!({ "AccessToken": session.access_token }))
            .await?;
        Ok(())
    }

    async fn get_current_identity(&self) -> Result<Option<Map<String, Value>>, IdentityError> {
        let Some(session) = self.cached() else {
            return Ok(None);
        };
        match self.call("GetUser", &json!({ "AccessToken": session.access_token })).await {
            Ok(response) => parse_user(&response, session.login_id.as_deref()).map(Some),
            Err(IdentityError::Provider { code, .. }) if code == NOT_AUTHORIZED => {
                tracing::info!("cached cognito session is no longer valid");
                self.replace_session(None)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn get_active_session_tokens(&self) -> Result<Option<SessionTokens>, IdentityError> {
        Ok(self.cached().as_ref().map(CachedSession::tokens))
    }
}

// =============================================================================
// WIRE PARSING
// =============================================================================

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type")]
    kind: String,
    #[serde(default, alias = "Message")]
    message: String,
}

fn parse_error(status: u16, body: &str) -> IdentityError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => IdentityError::Provider {
            code: err.kind.rsplit('#').next().unwrap_or(&err.kind).to_owned(),
            message: err.message,
        },
        Err(_) => IdentityError::Provider { code: format!("http {status}"), message: body.to_owned() },
    }
}

fn parse_auth_result(response: &Value) -> Result<CachedSession, IdentityError> {
    if let Some(challenge) = response.get("ChallengeName").and_then(Value::as_str) {
        return Err(IdentityError::Challenge(challenge.to_owned()));
    }
    let result = response
        .get("AuthenticationResult")
        .ok_or_else(|| IdentityError::Transport("InitiateAuth response has no AuthenticationResult".into()))?;
    let field = |key: &str| result.get(key).and_then(Value::as_str).map(str::to_owned);
    Ok(CachedSession {
        id_token: field("IdToken").ok_or_else(|| IdentityError::Transport("missing IdToken".into()))?,
        access_token: field("AccessToken").ok_or_else(|| IdentityError::Transport("missing AccessToken".into()))?,
        refresh_token: field("RefreshToken"),
        login_id: None,
    })
}

/// Shape a `GetUser` response like the browser SDK's current-user object.
fn parse_user(response: &Value, login_id: Option<&str>) -> Result<Map<String, Value>, IdentityError> {
    let username = response
        .get("Username")
        .and_then(Value::as_str)
        .ok_or_else(|| IdentityError::Transport("GetUser response has no Username".into()))?;

    let mut profile = Map::new();
    profile.insert("username".into(), Value::String(username.to_owned()));

    let attributes = response
        .get("UserAttributes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let sub = attributes
        .iter()
        .find(|attr| attr.get("Name").and_then(Value::as_str) == Some("sub"))
        .and_then(|attr| attr.get("Value"))
        .and_then(Value::as_str);
    profile.insert("userId".into(), Value::String(sub.unwrap_or(username).to_owned()));

    if let Some(login_id) = login_id {
        profile.insert("signInDetails".into(), json!({ "loginId": login_id, "authFlowType": AUTH_FLOW }));
    }
    Ok(profile)
}

fn build_authorize_url(hosted_ui: &HostedUiConfig, client_id: &str, state: &str) -> Result<String, String> {
    let domain = hosted_ui.domain.trim_end_matches('/');
    let base = if domain.starts_with("http://") || domain.starts_with("https://") {
        format!("{domain}/oauth2/authorize")
    } else {
        format!("https://{domain}/oauth2/authorize")
    };
    let url = reqwest::Url::parse_with_params(&base, &[
        ("identity_provider", "Google"),
        ("redirect_uri", hosted_ui.redirect_uri.as_str()),
        ("response_type", "code"),
        ("client_id", client_id),
        ("scope", "openid email profile"),
        ("state", state),
    ])
    .map_err(|e| e.to_string())?;
    Ok(url.into())
}
