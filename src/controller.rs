//! Session controller: the single owner of who is signed in.
//!
//! DESIGN
//! ======
//! The controller reconciles three views of the session: its in-memory
//! [`Session`], the persistent user store, and the active identity adapter.
//! Observers read snapshots or follow a `watch` channel; they never mutate.
//!
//! No operation returns an error. Adapter failures become notifications and
//! `tracing` events, and the session stays as it was (sign-out excepted: the
//! local session is always dropped).
//!
//! ORDERING
//! ========
//! Initialization and user actions may overlap. Every operation takes a
//! ticket from a generation counter when it starts. A result commits only if
//! no newer operation is still pending and none has committed since; a
//! failed operation releases its ticket without superseding anyone. Auth-change
//! events that arrive after the initial delivery apply only while nothing is
//! in flight. [`SessionController::reset`] raises the commit floor, so
//! anything in flight at a reset is discarded.

#[cfg(test)]
#[path = "controller_test.rs"]
mod controller_test;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;

use crate::api::SessionReset;
use crate::config::AuthMode;
use crate::identity::{AuthListener, Delivery, IdentityAdapter};
use crate::notify::Notifier;
use crate::store::UserStore;
use crate::user::UserRecord;

pub const SIGN_IN_FAILED: &str = "Error signing in with Google.";
pub const SIGN_OUT_SUCCEEDED: &str = "Logout successful";
pub const SIGN_OUT_FAILED: &str = "Error signing out.";
pub const CREDENTIAL_LOGIN_FAILED: &str = "Error logging in with Cognito.";

// =============================================================================
// STATE
// =============================================================================

/// Current belief about who is signed in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub user: Option<UserRecord>,
    /// True only while the startup reconciliation is in flight.
    pub loading: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    Uninitialized,
    Loading,
    Authenticated(UserRecord),
    Unauthenticated,
}

impl SessionPhase {
    fn of(initialized: bool, session: Session) -> Self {
        match session {
            Session { loading: true, .. } => Self::Loading,
            Session { user: Some(user), .. } => Self::Authenticated(user),
            Session { user: None, .. } if initialized => Self::Unauthenticated,
            Session { user: None, .. } => Self::Uninitialized,
        }
    }
}

#[derive(Debug, Default)]
struct Ledger {
    /// Last ticket handed out.
    issued: u64,
    /// Tickets at or below this can no longer commit.
    floor: u64,
    pending: BTreeSet<u64>,
    initialized: bool,
}

impl Ledger {
    fn begin(&mut self) -> u64 {
        self.issued += 1;
        self.pending.insert(self.issued);
        self.issued
    }

    fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Settle `ticket`; true if nothing newer is pending or has committed.
    fn finish(&mut self, ticket: u64) -> bool {
        self.pending.remove(&ticket);
        ticket > self.floor && self.pending.last().is_none_or(|&newest| newest < ticket)
    }

    /// Settle `ticket` with a result; true if the result should be adopted.
    fn settle(&mut self, ticket: u64) -> bool {
        let current = self.finish(ticket);
        if current {
            self.floor = ticket;
        }
        current
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

struct Inner {
    adapter: Arc<dyn IdentityAdapter>,
    store: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<Session>,
    ledger: Mutex<Ledger>,
}

/// Cheap to clone; clones share one session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// Build an uninitialized controller showing whatever user the store
    /// still holds. Call [`SessionController::initialize`] (or use
    /// [`SessionController::start`]) to reconcile with the provider.
    #[must_use]
    pub fn new(adapter: Arc<dyn IdentityAdapter>, store: Arc<dyn UserStore>, notifier: Arc<dyn Notifier>) -> Self {
        let user = stored_user(store.as_ref());
        let (state, _) = watch::channel(Session { user, loading: false });
        Self { inner: Arc::new(Inner { adapter, store, notifier, state, ledger: Mutex::default() }) }
    }

    /// Build a controller and run the startup reconciliation.
    pub async fn start(adapter: Arc<dyn IdentityAdapter>, store: Arc<dyn UserStore>, notifier: Arc<dyn Notifier>) -> Self {
        let controller = Self::new(adapter, store, notifier);
        controller.initialize().await;
        controller
    }

    #[must_use]
    pub fn mode(&self) -> AuthMode {
        self.inner.adapter.mode()
    }

    #[must_use]
    pub fn state(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        let initialized = self.inner.ledger().initialized;
        SessionPhase::of(initialized, self.state())
    }

    /// Follow every session change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    /// Ask the adapter for the current identity and adopt it.
    ///
    /// Runs once per controller; later calls return immediately. With a
    /// continuous provider, `loading` clears on the first auth-change
    /// delivery, which may come after this returns.
    pub async fn initialize(&self) {
        let ticket = {
            let mut ledger = self.inner.ledger();
            if ledger.initialized {
                tracing::debug!("session already initialized");
                return;
            }
            ledger.initialized = true;
            let ticket = ledger.begin();
            self.inner.state.send_modify(|s| s.loading = true);
            ticket
        };

        let delivered = Arc::new(AtomicBool::new(false));
        let listener = self.listener(ticket, delivered.clone());
        match self.inner.adapter.watch_current_user(listener).await {
            Ok(Delivery::Continuous) => {
                tracing::debug!(mode = %self.mode(), "watching auth changes");
            }
            Ok(Delivery::Once) => self.inner.settle_initial(ticket, &delivered, None),
            Err(e) => {
                tracing::warn!(mode = %self.mode(), error = %e, "current identity query failed; keeping the stored user");
                self.inner.settle_initial(ticket, &delivered, None);
            }
        }
    }

    fn listener(&self, ticket: u64, delivered: Arc<AtomicBool>) -> AuthListener {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Arc::new(move |user: Option<UserRecord>| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if delivered.load(Ordering::SeqCst) {
                inner.apply_auth_change(user);
            } else {
                inner.settle_initial(ticket, &delivered, Some(user));
            }
        })
    }

    /// Interactive sign-in: popup or redirect, depending on the provider.
    pub async fn sign_in_with_identity_provider(&self) {
        let ticket = self.inner.begin();
        match self.inner.adapter.sign_in_interactive().await {
            Ok(user) => self.inner.commit(ticket, Some(user)),
            Err(e) => {
                self.inner.abandon(ticket);
                tracing::warn!(mode = %self.mode(), error = %e, "interactive sign-in failed");
                self.inner.notifier.error(SIGN_IN_FAILED);
            }
        }
    }

    /// Sign out with the provider, then drop the local session whatever the
    /// provider said.
    pub async fn sign_out(&self) {
        let ticket = self.inner.begin();
        let result = self.inner.adapter.sign_out().await;
        self.inner.commit(ticket, None);
        match result {
            Ok(()) => self.inner.notifier.success(SIGN_OUT_SUCCEEDED),
            Err(e) => {
                tracing::warn!(mode = %self.mode(), error = %e, "provider sign-out failed; local session cleared anyway");
                self.inner.notifier.error(SIGN_OUT_FAILED);
            }
        }
    }

    /// Username/password sign-in. Does nothing for providers without
    /// credential support.
    pub async fn login_with_credentials(&self, identifier: &str, secret: &str) {
        if !self.inner.adapter.supports_credentials() {
            tracing::debug!(mode = %self.mode(), "credential login not available; ignoring");
            return;
        }
        let ticket = self.inner.begin();
        match self.inner.adapter.sign_in_with_credentials(identifier, secret).await {
            Ok(user) => self.inner.commit(ticket, Some(user)),
            Err(e) => {
                self.inner.abandon(ticket);
                tracing::warn!(login_id = identifier, error = %e, "credential login failed");
                self.inner.notifier.error(CREDENTIAL_LOGIN_FAILED);
            }
        }
    }

    /// Drop the in-memory session and discard anything still in flight.
    pub fn reset(&self) {
        let mut ledger = self.inner.ledger();
        ledger.floor = ledger.issued;
        self.inner.state.send_modify(|s| {
            s.user = None;
            s.loading = false;
        });
        tracing::info!(generation = ledger.floor, "session reset");
    }
}

impl SessionReset for SessionController {
    fn reset(&self) {
        SessionController::reset(self);
    }
}

// =============================================================================
// COMMIT PATHS
// =============================================================================

impl Inner {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn begin(&self) -> u64 {
        self.ledger().begin()
    }

    fn abandon(&self, ticket: u64) {
        self.ledger().finish(ticket);
    }

    /// Adopt `user` in memory and in the store if `ticket` is still current.
    fn commit(&self, ticket: u64, user: Option<UserRecord>) {
        let mut ledger = self.ledger();
        if !ledger.settle(ticket) {
            tracing::debug!(ticket, issued = ledger.issued, "result superseded by a newer operation");
            return;
        }
        self.persist(user.as_ref());
        tracing::info!(signed_in = user.is_some(), login_id = user.as_ref().and_then(UserRecord::login_id), "session updated");
        self.state.send_modify(|s| s.user = user);
    }

    /// First answer to the startup query. `found` is `None` when the query
    /// failed, in which case the stored user is kept.
    fn settle_initial(&self, ticket: u64, delivered: &AtomicBool, found: Option<Option<UserRecord>>) {
        let mut ledger = self.ledger();
        if delivered.swap(true, Ordering::SeqCst) {
            return;
        }
        if !ledger.settle(ticket) {
            tracing::debug!(ticket, issued = ledger.issued, "startup identity superseded by a newer operation");
            self.state.send_modify(|s| s.loading = false);
            return;
        }
        let user = match found {
            Some(user) => {
                self.persist(user.as_ref());
                user
            }
            None => stored_user(self.store.as_ref()),
        };
        tracing::info!(signed_in = user.is_some(), "startup reconciliation finished");
        self.state.send_modify(|s| {
            s.user = user;
            s.loading = false;
        });
    }

    fn apply_auth_change(&self, user: Option<UserRecord>) {
        let ledger = self.ledger();
        if ledger.in_flight() > 0 {
            tracing::debug!(in_flight = ledger.in_flight(), "auth change ignored while an operation is in flight");
            return;
        }
        self.persist(user.as_ref());
        tracing::info!(signed_in = user.is_some(), "auth change applied");
        self.state.send_modify(|s| s.user = user);
    }

    fn persist(&self, user: Option<&UserRecord>) {
        let result = match user {
            Some(user) => self.store.write(user),
            None => self.store.clear(),
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "failed to update the user store");
        }
    }
}

fn stored_user(store: &dyn UserStore) -> Option<UserRecord> {
    store.read().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to read the user store");
        None
    })
}
