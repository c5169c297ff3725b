//! Cached user record and identity-token claim decoding.
//!
//! DESIGN
//! ======
//! Providers disagree on profile shape, so the record stays a loose JSON
//! object rather than a fixed struct. It is assembled from three sources in
//! order (provider profile, session token fields, decoded token claims) and
//! a later source overwrites an earlier one on key collision.

#[cfg(test)]
#[path = "user_test.rs"]
mod user_test;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Record key holding the raw identity token.
pub const ID_TOKEN_KEY: &str = "idToken";
/// Record key holding the login identifier used at sign-in.
pub const LOGIN_ID_KEY: &str = "userEmail";

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ClaimsError {
    #[error("identity token is not a three-part JWT")]
    Malformed,
    #[error("identity token payload is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("identity token payload is not a JSON object: {0}")]
    Payload(String),
}

// =============================================================================
// SESSION TOKENS
// =============================================================================

/// Tokens of the provider's active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTokens {
    /// Signed identity token (JWT).
    pub id_token: String,
    /// Access token, when the provider exposes one.
    pub access_token: Option<String>,
    /// Identifier the user typed at sign-in (email or username).
    pub login_id: Option<String>,
}

// =============================================================================
// USER RECORD
// =============================================================================

/// Locally cached representation of an authenticated identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserRecord(Map<String, Value>);

impl UserRecord {
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Merge a provider profile with session tokens and their decoded claims.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimsError`] if the identity token cannot be decoded.
    pub fn assemble(profile: Map<String, Value>, tokens: Option<&SessionTokens>) -> Result<Self, ClaimsError> {
        let mut fields = profile;
        if let Some(tokens) = tokens {
            fields.insert(ID_TOKEN_KEY.into(), Value::String(tokens.id_token.clone()));
            if let Some(login_id) = &tokens.login_id {
                fields.insert(LOGIN_ID_KEY.into(), Value::String(login_id.clone()));
            }
            let claims = decode_claims(&tokens.id_token)?;
            fields.extend(claims);
        }
        Ok(Self(fields))
    }

    #[must_use]
    pub fn id_token(&self) -> Option<&str> {
        self.str_field(ID_TOKEN_KEY).filter(|t| !t.is_empty())
    }

    /// Login identifier shown to the user: `email`, then `userEmail`, then `username`.
    #[must_use]
    pub fn login_id(&self) -> Option<&str> {
        ["email", LOGIN_ID_KEY, "username"]
            .into_iter()
            .find_map(|key| self.str_field(key))
    }

    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }
}

/// Decode the payload segment of a JWT without verifying its signature.
///
/// # Errors
///
/// Returns [`ClaimsError`] when the token has no payload segment or the
/// payload is not a base64url-encoded JSON object.
pub fn decode_claims(token: &str) -> Result<Map<String, Value>, ClaimsError> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ClaimsError::Malformed);
    };

    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(claims)) => Ok(claims),
        Ok(other) => Err(ClaimsError::Payload(format!("expected object, got {other}"))),
        Err(e) => Err(ClaimsError::Payload(e.to_string())),
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
