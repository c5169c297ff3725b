//! Runtime configuration parsed from environment variables.

use std::path::PathBuf;

pub const DEFAULT_STORE_PATH: &str = ".neo/storage.json";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required env var {var}")]
    Missing { var: &'static str },
    #[error("invalid {var} value '{value}' (expected {expected})")]
    Invalid { var: &'static str, value: String, expected: &'static str },
    #[error("configured auth mode is {configured} but the identity provider is {provided}")]
    ProviderMismatch { configured: AuthMode, provided: AuthMode },
    #[error("{0}")]
    Unsupported(&'static str),
}

/// Which identity provider backs the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Popup sign-in with a continuous auth-change subscription.
    Firebase,
    /// Credentials or redirect sign-in with one-shot identity queries.
    Cognito,
}

impl AuthMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Firebase => "firebase",
            Self::Cognito => "cognito",
        }
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "firebase" => Ok(Self::Firebase),
            "cognito" => Ok(Self::Cognito),
            _ => Err(ConfigError::Invalid {
                var: "NEO_AUTH_MODE",
                value: raw.to_owned(),
                expected: "'firebase' or 'cognito'",
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

/// Cognito hosted UI used for the Google redirect flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedUiConfig {
    pub domain: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CognitoConfig {
    pub region: String,
    pub client_id: String,
    pub hosted_ui: Option<HostedUiConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeoConfig {
    pub auth_mode: AuthMode,
    pub base_url: String,
    pub store_path: PathBuf,
    pub timeouts: HttpTimeouts,
    /// Present only when `auth_mode` is [`AuthMode::Cognito`].
    pub cognito: Option<CognitoConfig>,
}

impl NeoConfig {
    /// Build config from the process environment.
    ///
    /// Required:
    /// - `NEO_AUTH_MODE`: `firebase` or `cognito`
    /// - `NEO_BASE_URL`: API base URL
    /// - `NEO_COGNITO_REGION`, `NEO_COGNITO_CLIENT_ID` (cognito mode only)
    ///
    /// Optional:
    /// - `NEO_STORE_PATH`: default `.neo/storage.json`
    /// - `NEO_REQUEST_TIMEOUT_SECS`: default 30
    /// - `NEO_CONNECT_TIMEOUT_SECS`: default 10
    /// - `NEO_COGNITO_DOMAIN` + `NEO_COGNITO_REDIRECT_URI`: hosted UI redirect sign-in
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`NeoConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());

        let auth_mode: AuthMode = get("NEO_AUTH_MODE")
            .ok_or(ConfigError::Missing { var: "NEO_AUTH_MODE" })?
            .parse()?;
        let base_url = get("NEO_BASE_URL")
            .ok_or(ConfigError::Missing { var: "NEO_BASE_URL" })?
            .trim_end_matches('/')
            .to_owned();
        let store_path = get("NEO_STORE_PATH").map_or_else(|| PathBuf::from(DEFAULT_STORE_PATH), PathBuf::from);
        let timeouts = HttpTimeouts {
            request_secs: parse_secs(get("NEO_REQUEST_TIMEOUT_SECS"), "NEO_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            connect_secs: parse_secs(get("NEO_CONNECT_TIMEOUT_SECS"), "NEO_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        };

        let cognito = match auth_mode {
            AuthMode::Firebase => None,
            AuthMode::Cognito => {
                let region = get("NEO_COGNITO_REGION").ok_or(ConfigError::Missing { var: "NEO_COGNITO_REGION" })?;
                let client_id =
                    get("NEO_COGNITO_CLIENT_ID").ok_or(ConfigError::Missing { var: "NEO_COGNITO_CLIENT_ID" })?;
                let hosted_ui = match (get("NEO_COGNITO_DOMAIN"), get("NEO_COGNITO_REDIRECT_URI")) {
                    (Some(domain), Some(redirect_uri)) => Some(HostedUiConfig { domain, redirect_uri }),
                    (None, None) => None,
                    (Some(_), None) => return Err(ConfigError::Missing { var: "NEO_COGNITO_REDIRECT_URI" }),
                    (None, Some(_)) => return Err(ConfigError::Missing { var: "NEO_COGNITO_DOMAIN" }),
                };
                Some(CognitoConfig { region, client_id, hosted_ui })
            }
        };

        Ok(Self { auth_mode, base_url, store_path, timeouts, cognito })
    }

    /// File holding the Cognito session tokens, next to the user store.
    #[must_use]
    pub fn token_cache_path(&self) -> PathBuf {
        self.store_path.with_file_name("cognito-session.json")
    }
}

fn parse_secs(raw: Option<String>, var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => match value.parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(secs),
            _ => Err(ConfigError::Invalid { var, value, expected: "a positive number of seconds" }),
        },
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
