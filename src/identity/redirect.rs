//! Provider B: credential or redirect sign-in with one-shot identity queries.
//!
//! DESIGN
//! ======
//! The SDK keeps its own session. Every operation here is "act, then ask":
//! sign in, then query the current identity and active tokens and build the
//! record from the answers. Credential login needs the tokens (the record is
//! useless to the HTTP client without `idToken`); startup and redirect
//! sign-in accept a profile without them.

#[cfg(test)]
#[path = "redirect_test.rs"]
mod redirect_test;

use std::sync::Arc;

use serde_json::{Map, Value};

use super::{AuthListener, Delivery, IdentityAdapter, IdentityError, IdentitySnapshot};
use crate::config::AuthMode;
use crate::user::{SessionTokens, UserRecord};

/// Capabilities of a redirect-style identity SDK.
#[async_trait::async_trait]
pub trait RedirectSdk: Send + Sync {
    async fn sign_in_with_credentials(&self, identifier: &str, secret: &str) -> Result<(), IdentityError>;

    async fn sign_in_interactive_redirect(&self) -> Result<(), IdentityError>;

    async fn sign_out_current(&self) -> Result<(), IdentityError>;

    /// Profile of the signed-in identity, `None` when nobody is signed in.
    async fn get_current_identity(&self) -> Result<Option<Map<String, Value>>, IdentityError>;

    async fn get_active_session_tokens(&self) -> Result<Option<SessionTokens>, IdentityError>;
}

pub struct RedirectAdapter {
    sdk: Arc<dyn RedirectSdk>,
}

impl RedirectAdapter {
    #[must_use]
    pub fn new(sdk: Arc<dyn RedirectSdk>) -> Self {
        Self { sdk }
    }

    /// Current identity with whatever tokens the SDK can still produce.
    async fn current_user(&self) -> Result<Option<UserRecord>, IdentityError> {
        let Some(profile) = self.sdk.get_current_identity().await? else {
            return Ok(None);
        };
        let tokens = match self.sdk.get_active_session_tokens().await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(error = %e, "session tokens unavailable; keeping profile only");
                None
            }
        };
        Ok(Some(IdentitySnapshot { profile, tokens }.into_record()?))
    }
}

#[async_trait::async_trait]
impl IdentityAdapter for RedirectAdapter {
    fn mode(&self) -> AuthMode {
        AuthMode::Cognito
    }

    fn supports_credentials(&self) -> bool {
        true
    }

    async fn sign_in_interactive(&self) -> Result<UserRecord, IdentityError> {
        self.sdk.sign_in_interactive_redirect().await?;
        self.current_user().await?.ok_or(IdentityError::NotSignedIn)
    }

    async fn sign_in_with_credentials(&self, identifier: &str, secret: &str) -> Result<UserRecord, IdentityError> {
        self.sdk.sign_in_with_credentials(identifier, secret).await?;
        let profile = self.sdk.get_current_identity().await?.ok_or(IdentityError::NotSignedIn)?;
        let tokens = self
            .sdk
            .get_active_session_tokens()
            .await?
            .ok_or(IdentityError::NotSignedIn)?;
        let user = IdentitySnapshot { profile, tokens: Some(tokens) }.into_record()?;
        tracing::info!(login_id = user.login_id().unwrap_or(identifier), "credential sign-in completed");
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.sdk.sign_out_current().await
    }

    async fn watch_current_user(&self, listener: AuthListener) -> Result<Delivery, IdentityError> {
        let user = self.current_user().await?;
        tracing::debug!(signed_in = user.is_some(), "queried current identity");
        listener(user);
        Ok(Delivery::Once)
    }
}
