//! Provider A: popup sign-in with a continuous auth-change subscription.

#[cfg(test)]
#[path = "popup_test.rs"]
mod popup_test;

use std::sync::Arc;

use super::{AuthListener, Delivery, IdentityAdapter, IdentityError, IdentitySnapshot};
use crate::config::AuthMode;
use crate::user::UserRecord;

/// Called by the SDK whenever the signed-in identity changes.
pub type SnapshotCallback = Box<dyn Fn(Option<IdentitySnapshot>) + Send + Sync>;

/// Capabilities of a popup-style identity SDK.
#[async_trait::async_trait]
pub trait PopupSdk: Send + Sync {
    async fn sign_in_interactive(&self) -> Result<IdentitySnapshot, IdentityError>;

    async fn sign_out_current(&self) -> Result<(), IdentityError>;

    /// Register `callback` for every auth-state change, including the current one.
    fn subscribe_to_auth_changes(&self, callback: SnapshotCallback) -> Result<(), IdentityError>;
}

pub struct PopupAdapter {
    sdk: Arc<dyn PopupSdk>,
}

impl PopupAdapter {
    #[must_use]
    pub fn new(sdk: Arc<dyn PopupSdk>) -> Self {
        Self { sdk }
    }
}

/// Snapshot to record; an undecodable token is logged and treated as signed out.
fn snapshot_to_user(snapshot: Option<IdentitySnapshot>) -> Option<UserRecord> {
    match snapshot?.into_record() {
        Ok(user) => Some(user),
        Err(e) => {
            tracing::warn!(error = %e, "auth change carried an undecodable identity token");
            None
        }
    }
}

#[async_trait::async_trait]
impl IdentityAdapter for PopupAdapter {
    fn mode(&self) -> AuthMode {
        AuthMode::Firebase
    }

    fn supports_credentials(&self) -> bool {
        false
    }

    async fn sign_in_interactive(&self) -> Result<UserRecord, IdentityError> {
        let snapshot = self.sdk.sign_in_interactive().await?;
        let user = snapshot.into_record()?;
        tracing::info!(login_id = user.login_id().unwrap_or("<unknown>"), "popup sign-in completed");
        Ok(user)
    }

    async fn sign_in_with_credentials(&self, _identifier: &str, _secret: &str) -> Result<UserRecord, IdentityError> {
        Err(IdentityError::Unsupported("credential sign-in"))
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.sdk.sign_out_current().await
    }

    async fn watch_current_user(&self, listener: AuthListener) -> Result<Delivery, IdentityError> {
        self.sdk.subscribe_to_auth_changes(Box::new(move |snapshot| {
            listener(snapshot_to_user(snapshot));
        }))?;
        tracing::debug!("subscribed to auth changes");
        Ok(Delivery::Continuous)
    }
}
