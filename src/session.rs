//! Identity/session seam.
//!
//! Authentication itself lives elsewhere. This module only exposes "who is
//! signed in right now" as a point query plus a change stream, which is all
//! the orchestrator and the ledger need. Losing the session means "no
//! identity": paid tiers are gated, free tiers are not.

use tokio::sync::watch;
use tracing::info;

/// A signed-in user's identity.
pub type UserId = String;

/// Current session plus change notifications.
pub trait SessionProvider: Send + Sync {
    /// The signed-in user, if any.
    fn current(&self) -> Option<UserId>;

    /// Receiver that yields on every sign-in, sign-out or user switch.
    fn subscribe(&self) -> watch::Receiver<Option<UserId>>;
}

/// A session that never changes, e.g. the CLI's `--user` flag.
#[derive(Debug)]
pub struct StaticSession {
    tx: watch::Sender<Option<UserId>>,
}

impl StaticSession {
    pub fn new(user: Option<UserId>) -> Self {
        let (tx, _rx) = watch::channel(user);
        Self { tx }
    }

    pub fn anonymous() -> Self {
        Self::new(None)
    }
}

impl SessionProvider for StaticSession {
    fn current(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }
}

/// A session driven by an auth provider's callbacks.
#[derive(Debug)]
pub struct WatchSession {
    tx: watch::Sender<Option<UserId>>,
}

impl Default for WatchSession {
    fn default() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }
}

impl WatchSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user: impl Into<UserId>) {
        let user = user.into();
        info!("Session started for {}", user);
        self.set(Some(user));
    }

    pub fn sign_out(&self) {
        info!("Session ended");
        self.set(None);
    }

    /// Replace the identity; subscribers are woken only on an actual change.
    fn set(&self, user: Option<UserId>) {
        self.tx.send_if_modified(|current| {
            if *current == user {
                false
            } else {
                *current = user;
                true
            }
        });
    }
}

impl SessionProvider for WatchSession {
    fn current(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }
}
