//! Refresh Coordinator
//!
//! Exchanges the refresh token for a new pair, with at most one exchange in
//! flight per process. Callers that lose the race get `InFlight` back
//! immediately instead of queueing a second network call.

use std::sync::Arc;

use serde::Deserialize;

use crate::session::api::AuthApi;
use crate::session::escalator::{EscalationReason, Escalator};
use crate::session::flags::SessionFlags;
use crate::session::state::SessionStore;

/// What to do when a refresh fails for a reason other than a dead refresh
/// token (network error, 5xx)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientFailurePolicy {
    /// Treat the session as expired and notify the user
    #[default]
    Escalate,
    /// Keep the session; the next monitor tick tries again
    RetryNextTick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// New tokens are stored
    Refreshed,
    /// Another refresh was already running
    InFlight,
    /// A logout is in progress
    LoggingOut,
    /// The session already expired and is waiting for acknowledgement
    SessionExpired,
    /// No refresh token is stored
    NoRefreshToken,
    /// The server refused the refresh token
    Rejected,
    /// The request or local storage failed
    Failed,
    /// Tokens arrived after the session was cleared or replaced
    Discarded,
}

impl RefreshOutcome {
    pub fn is_refreshed(self) -> bool {
        self == RefreshOutcome::Refreshed
    }
}

pub struct RefreshCoordinator {
    api: Arc<dyn AuthApi>,
    store: Arc<SessionStore>,
    flags: Arc<SessionFlags>,
    escalator: Arc<Escalator>,
    policy: TransientFailurePolicy,
}

impl RefreshCoordinator {
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: Arc<SessionStore>,
        flags: Arc<SessionFlags>,
        escalator: Arc<Escalator>,
        policy: TransientFailurePolicy,
    ) -> Self {
        Self {
            api,
            store,
            flags,
            escalator,
            policy,
        }
    }

    pub fn policy(&self) -> TransientFailurePolicy {
        self.policy
    }

    #[tracing::instrument(name = "refresh_session", skip(self))]
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(_in_flight) = self.flags.try_begin_refresh() else {
            tracing::debug!("Refresh already in flight");
            return RefreshOutcome::InFlight;
        };

        if self.flags.is_logging_out() {
            tracing::debug!("Logout in progress; not refreshing");
            return RefreshOutcome::LoggingOut;
        }

        if self.escalator.is_active() {
            return RefreshOutcome::SessionExpired;
        }

        let refresh_token = match self.store.refresh_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::info!("No refresh token stored");
                self.escalator.escalate(EscalationReason::MissingSession);
                return RefreshOutcome::NoRefreshToken;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to read refresh token");
                self.escalator.escalate(EscalationReason::StorageUnavailable);
                return RefreshOutcome::Failed;
            }
        };

        match self.api.refresh(&refresh_token).await {
            Ok(pair) => {
                if self.flags.is_logging_out() {
                    tracing::info!("Logout started during refresh; discarding new tokens");
                    return RefreshOutcome::Discarded;
                }

                match self.store.replace_tokens_if(
                    &refresh_token,
                    &pair.access_token,
                    &pair.refresh_token,
                ) {
                    Ok(true) => {
                        tracing::info!("Access token refreshed");
                        RefreshOutcome::Refreshed
                    }
                    Ok(false) => {
                        tracing::info!("Session changed during refresh; discarding new tokens");
                        RefreshOutcome::Discarded
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to store refreshed tokens");
                        RefreshOutcome::Failed
                    }
                }
            }
            Err(e) if e.is_terminal_refresh_failure() => {
                tracing::warn!(error = %e, "Refresh token rejected");
                self.escalator.escalate(EscalationReason::RefreshRejected);
                RefreshOutcome::Rejected
            }
            Err(e) => {
                tracing::warn!(error = %e, policy = ?self.policy, "Token refresh failed");
                if self.policy == TransientFailurePolicy::Escalate {
                    self.escalator.escalate(EscalationReason::RefreshFailed);
                }
                RefreshOutcome::Failed
            }
        }
    }
}
