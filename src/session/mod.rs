//! Client side of the session protocol: keeps the stored token pair fresh,
//! refreshes at most once at a time, and tells the user exactly once when
//! the session cannot be recovered.

mod api;
mod coordinator;
mod error;
mod escalator;
mod flags;
mod manager;
mod monitor;
mod request;
mod state;
mod token;

#[cfg(test)]
mod fake_api;

pub use api::{AuthApi, HttpAuthApi};
pub use coordinator::{RefreshCoordinator, RefreshOutcome, TransientFailurePolicy};
pub use error::{SessionError, EXPIRED_REFRESH_TOKEN, INVALID_REFRESH_TOKEN};
pub use escalator::{EscalationReason, Escalator, ExpiryNotice, TracingNotice};
pub use flags::{FlagGuard, SessionFlags};
pub use manager::SessionManager;
pub use monitor::{
    Cadence, ExpiryMonitor, MonitorConfig, MonitorHandle, TickOutcome,
    DEFAULT_ACCESS_CHECK_INTERVAL_MS, DEFAULT_BACKGROUND_CHECK_INTERVAL_MS,
};
pub use request::AuthorizedClient;
pub use state::{
    FileStorage, KeyValueStorage, MemoryStorage, Session, SessionStore, ACCESS_TOKEN_KEY,
    ACCOUNT_NUMBER_KEY, REFRESH_TOKEN_KEY, USER_NAME_KEY,
};
pub use token::{decode_access_claims, is_token_valid, AccessClaims};
