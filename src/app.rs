//! Application wiring: config, store, identity adapter, controller, and API
//! client assembled in one place.

use std::sync::Arc;

use crate::api::{ApiClient, ApiError};
use crate::config::{AuthMode, ConfigError, NeoConfig};
use crate::controller::SessionController;
use crate::identity::cognito::CognitoClient;
use crate::identity::{IdentityError, ProviderSdk};
use crate::notify::Notifier;
use crate::store::{FileUserStore, UserStore};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Everything a host needs to drive one session.
pub struct NeoApp {
    pub config: NeoConfig,
    pub store: Arc<dyn UserStore>,
    pub controller: SessionController,
    pub api: ApiClient,
}

impl NeoApp {
    /// Wire the session for `config` around an already-built provider SDK.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::ProviderMismatch`] if `sdk` is not the configured provider
    /// - [`ApiError::ClientBuild`] if the HTTP client cannot be built
    pub fn assemble(
        config: NeoConfig,
        sdk: ProviderSdk,
        store: Arc<dyn UserStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AppError> {
        if sdk.mode() != config.auth_mode {
            return Err(ConfigError::ProviderMismatch { configured: config.auth_mode, provided: sdk.mode() }.into());
        }
        let controller = SessionController::new(sdk.into_adapter(), store.clone(), notifier);
        let api = ApiClient::new(config.base_url.clone(), config.timeouts, store.clone(), Arc::new(controller.clone()))?;
        tracing::debug!(mode = %config.auth_mode, base_url = %config.base_url, "session wired");
        Ok(Self { config, store, controller, api })
    }

    /// Wire the session with the file store and the provider SDK this
    /// process can run natively.
    ///
    /// # Errors
    ///
    /// See [`NeoApp::native_sdk`] and [`NeoApp::assemble`].
    pub fn from_config(config: NeoConfig, notifier: Arc<dyn Notifier>) -> Result<Self, AppError> {
        let sdk = Self::native_sdk(&config)?;
        let store: Arc<dyn UserStore> = Arc::new(FileUserStore::new(config.store_path.clone()));
        Self::assemble(config, sdk, store, notifier)
    }

    /// Provider SDK available without a browser host.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Unsupported`] in firebase mode, whose SDK needs a browser popup
    /// - [`ConfigError::Missing`] if cognito settings are absent
    /// - [`IdentityError::Transport`] if the Cognito HTTP client cannot be built
    pub fn native_sdk(config: &NeoConfig) -> Result<ProviderSdk, AppError> {
        match config.auth_mode {
            AuthMode::Firebase => Err(ConfigError::Unsupported(
                "firebase sign-in needs a browser popup host; embed the library with a PopupSdk instead",
            )
            .into()),
            AuthMode::Cognito => {
                let cognito = config
                    .cognito
                    .as_ref()
                    .ok_or(ConfigError::Missing { var: "NEO_COGNITO_CLIENT_ID" })?;
                let client = CognitoClient::new(cognito, config.timeouts, config.token_cache_path())?;
                Ok(ProviderSdk::Redirect(Arc::new(client)))
            }
        }
    }

    /// Run the startup reconciliation.
    pub async fn start(&self) {
        self.controller.initialize().await;
    }
}
