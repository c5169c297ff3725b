//! Client-side session layer for the neo dashboard.
//!
//! ARCHITECTURE
//! ============
//! - [`store`]: the persistent `neoUser` slot
//! - [`user`]: the cached user record and token claim decoding
//! - [`identity`]: one adapter contract over the popup and redirect providers
//! - [`controller`]: the session owner and its ordering rules
//! - [`api`]: the authenticated HTTP client
//! - [`notify`]: the user-visible notification channel
//! - [`app`]: wiring for hosts such as the `neo` binary

pub mod api;
pub mod app;
pub mod config;
pub mod controller;
pub mod dashboard;
pub mod identity;
pub mod notify;
pub mod store;
pub mod user;

pub use api::{ApiClient, ApiError, SessionReset};
pub use app::{AppError, NeoApp};
pub use config::{AuthMode, ConfigError, NeoConfig};
pub use controller::{Session, SessionController, SessionPhase};
pub use identity::{IdentityAdapter, IdentityError, ProviderSdk};
pub use store::{FileUserStore, MemoryUserStore, StoreError, UserStore};
pub use user::UserRecord;
