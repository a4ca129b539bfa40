//! Failure Escalator
//!
//! Turns "the session cannot be recovered" into a single user-facing notice.
//! The notice is shown at most once per expiry; it is re-armed only after
//! the user acknowledges it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Why the session was declared expired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationReason {
    /// No tokens are stored
    MissingSession,
    /// The stored access token could not be decoded
    MalformedToken,
    /// The server refused the refresh token
    RefreshRejected,
    /// The refresh request failed and the policy is to give up
    RefreshFailed,
    /// Session storage could not be read
    StorageUnavailable,
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            EscalationReason::MissingSession => "no session stored",
            EscalationReason::MalformedToken => "access token unreadable",
            EscalationReason::RefreshRejected => "refresh token rejected",
            EscalationReason::RefreshFailed => "refresh request failed",
            EscalationReason::StorageUnavailable => "session storage unavailable",
        };
        f.write_str(reason)
    }
}

/// Where the "session expired" notice is rendered
pub trait ExpiryNotice: Send + Sync {
    fn show(&self, reason: EscalationReason);

    /// Called once the user has acknowledged the notice
    fn dismiss(&self) {}
}

/// Renders the notice as a warning in the log, for headless clients
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotice;

impl ExpiryNotice for TracingNotice {
    fn show(&self, reason: EscalationReason) {
        tracing::warn!(%reason, "Your session has expired. Please sign in again.");
    }
}

pub struct Escalator {
    shown: AtomicBool,
    notice: Arc<dyn ExpiryNotice>,
    state: watch::Sender<bool>,
}

impl Escalator {
    pub fn new(notice: Arc<dyn ExpiryNotice>) -> Self {
        let (state, _) = watch::channel(false);
        Self {
            shown: AtomicBool::new(false),
            notice,
            state,
        }
    }

    /// Shows the notice unless it is already showing. Returns `true` if this
    /// call showed it.
    pub fn escalate(&self, reason: EscalationReason) -> bool {
        if self
            .shown
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(%reason, "Session expiry notice already showing");
            return false;
        }

        tracing::info!(%reason, "Escalating session expiry");
        self.state.send_replace(true);
        self.notice.show(reason);
        true
    }

    /// Records the user's acknowledgement and re-arms the escalator.
    /// Returns `false` if no notice was showing.
    pub fn acknowledge(&self) -> bool {
        if self
            .shown
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.state.send_replace(false);
        self.notice.dismiss();
        true
    }

    pub fn is_active(&self) -> bool {
        self.shown.load(Ordering::Acquire)
    }

    /// Observe the notice state; `true` while it is showing
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

impl Default for Escalator {
    fn default() -> Self {
        Self::new(Arc::new(TracingNotice))
    }
}
