//! Identity providers behind one capability interface.
//!
//! DESIGN
//! ======
//! The session controller only sees [`IdentityAdapter`]. Two adapters sit
//! behind it, each wrapping an opaque provider SDK:
//!
//! - [`popup::PopupAdapter`] over a [`popup::PopupSdk`] (firebase-style:
//!   popup sign-in, continuous auth-change subscription).
//! - [`redirect::RedirectAdapter`] over a [`redirect::RedirectSdk`]
//!   (cognito-style: credentials or redirect sign-in, one-shot queries).
//!
//! The adapter is chosen once at startup from [`ProviderSdk`]; nothing
//! downstream branches on the provider.

pub mod cognito;
pub mod popup;
pub mod redirect;

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::AuthMode;
use crate::user::{ClaimsError, SessionTokens, UserRecord};

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity provider request failed: {0}")]
    Transport(String),
    #[error("identity provider rejected the request ({code}): {message}")]
    Provider { code: String, message: String },
    #[error("sign-in needs an additional challenge: {0}")]
    Challenge(String),
    #[error("no identity is signed in")]
    NotSignedIn,
    #[error("{0} is not supported by this identity provider")]
    Unsupported(&'static str),
    #[error("identity token could not be decoded: {0}")]
    Claims(#[from] ClaimsError),
}

// =============================================================================
// SHARED TYPES
// =============================================================================

/// A provider's view of the signed-in identity before it becomes a record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentitySnapshot {
    pub profile: Map<String, Value>,
    pub tokens: Option<SessionTokens>,
}

impl IdentitySnapshot {
    /// Merge profile, token fields, and decoded claims into a record.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimsError`] if the identity token cannot be decoded.
    pub fn into_record(self) -> Result<UserRecord, ClaimsError> {
        UserRecord::assemble(self.profile, self.tokens.as_ref())
    }
}

/// Receives the current identity each time the provider reports it.
pub type AuthListener = Arc<dyn Fn(Option<UserRecord>) + Send + Sync>;

/// How [`IdentityAdapter::watch_current_user`] delivered its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The listener was called exactly once before the call returned.
    Once,
    /// A subscription is registered; the listener fires now or later, possibly repeatedly.
    Continuous,
}

// =============================================================================
// ADAPTER CONTRACT
// =============================================================================

#[async_trait::async_trait]
pub trait IdentityAdapter: Send + Sync {
    fn mode(&self) -> AuthMode;

    /// Whether [`IdentityAdapter::sign_in_with_credentials`] can succeed at all.
    fn supports_credentials(&self) -> bool;

    /// Interactive sign-in (popup or redirect).
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the provider flow fails or yields no identity.
    async fn sign_in_interactive(&self) -> Result<UserRecord, IdentityError>;

    /// Username/password sign-in followed by identity and token retrieval.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if sign-in, identity lookup, or claim decoding fails.
    async fn sign_in_with_credentials(&self, identifier: &str, secret: &str) -> Result<UserRecord, IdentityError>;

    /// # Errors
    ///
    /// Returns [`IdentityError`] if the provider sign-out call fails.
    async fn sign_out(&self) -> Result<(), IdentityError>;

    /// Report the current identity to `listener`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if the query or subscription registration fails.
    async fn watch_current_user(&self, listener: AuthListener) -> Result<Delivery, IdentityError>;
}

/// The provider SDK available to this host.
#[derive(Clone)]
pub enum ProviderSdk {
    Popup(Arc<dyn popup::PopupSdk>),
    Redirect(Arc<dyn redirect::RedirectSdk>),
}

impl ProviderSdk {
    #[must_use]
    pub fn mode(&self) -> AuthMode {
        match self {
            Self::Popup(_) => AuthMode::Firebase,
            Self::Redirect(_) => AuthMode::Cognito,
        }
    }

    /// Wrap the SDK in its adapter.
    #[must_use]
    pub fn into_adapter(self) -> Arc<dyn IdentityAdapter> {
        match self {
            Self::Popup(sdk) => Arc::new(popup::PopupAdapter::new(sdk)),
            Self::Redirect(sdk) => Arc::new(redirect::RedirectAdapter::new(sdk)),
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
