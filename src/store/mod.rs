/// Persistence for users, refresh tokens and login history
///
/// Handlers talk to an `AuthStore` trait object so the server can run against
/// Postgres or, when no database is configured, against process memory.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;

pub use memory::InMemoryAuthStore;
pub use postgres::PgAuthStore;

/// A registered user as stored
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub phone_number: String,
    pub name: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub account_number: String,
    pub login_fail_count: i32,
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a user
#[derive(Debug, Clone)]
pub struct NewUser {
    pub phone_number: String,
    pub name: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub account_number: String,
}

/// Result of atomically consuming a refresh token
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumedToken {
    /// Token was live and has now been revoked
    Consumed {
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    /// Token was already revoked (rotated away or logged out)
    Revoked,
    /// No token with that hash
    NotFound,
}

/// How a login attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    WrongPassword,
    AccountNotFound,
    AccountLocked,
}

impl LoginOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginOutcome::Success => "SUCCESS",
            LoginOutcome::WrongPassword => "WRONG_PASSWORD",
            LoginOutcome::AccountNotFound => "ACCOUNT_NOT_FOUND",
            LoginOutcome::AccountLocked => "ACCOUNT_LOCKED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "SUCCESS" => Some(LoginOutcome::Success),
            "WRONG_PASSWORD" => Some(LoginOutcome::WrongPassword),
            "ACCOUNT_NOT_FOUND" => Some(LoginOutcome::AccountNotFound),
            "ACCOUNT_LOCKED" => Some(LoginOutcome::AccountLocked),
            _ => None,
        }
    }
}

/// One entry of the login history
#[derive(Debug, Clone)]
pub struct LoginAttempt {
    /// Normalized when it parsed, otherwise as typed
    pub phone_number: String,
    /// `None` when no account matched
    pub user_id: Option<Uuid>,
    pub outcome: LoginOutcome,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Consecutive failures after this attempt
    pub fail_count: i32,
    pub is_locked: bool,
    pub attempted_at: DateTime<Utc>,
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Inserts a user. A taken phone number or email yields
    /// `DatabaseError::UniqueConstraintViolation`.
    async fn insert_user(&self, user: NewUser) -> Result<UserRecord, AppError>;

    async fn find_user_by_phone(&self, phone_number: &str) -> Result<Option<UserRecord>, AppError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError>;

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>, AppError>;

    /// Bumps the failure counter and locks the account once it reaches
    /// `max_failures`. Returns whether the account is now locked.
    async fn record_login_failure(&self, user_id: Uuid, max_failures: u32) -> Result<bool, AppError>;

    async fn reset_login_failures(&self, user_id: Uuid) -> Result<(), AppError>;

    async fn save_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Revokes the token with `token_hash` if it is live and reports what it
    /// found. Two concurrent calls with the same hash never both see
    /// `Consumed`.
    async fn consume_refresh_token(&self, token_hash: &str) -> Result<ConsumedToken, AppError>;

    async fn revoke_all_user_tokens(&self, user_id: Uuid) -> Result<u64, AppError>;

    /// Deletes tokens that can never be used again: expired before `now` or
    /// already revoked. Returns the number removed.
    async fn delete_stale_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError>;

    async fn record_login_attempt(&self, attempt: LoginAttempt) -> Result<(), AppError>;

    /// Most recent attempts for `phone_number`, newest first
    async fn recent_login_attempts(
        &self,
        phone_number: &str,
        limit: usize,
    ) -> Result<Vec<LoginAttempt>, AppError>;
}
