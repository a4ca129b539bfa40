/// Refresh Token Management
///
/// Refresh tokens are:
/// - Cryptographically secure random 64-character strings
/// - Hashed with SHA-256 before storage (never store plaintext)
/// - Single-use: every refresh revokes the presented token and issues a new one
/// - Revocable all at once per user (logout)

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{AppError, AuthError};
use crate::store::{AuthStore, ConsumedToken};

/// Generate a new cryptographically secure refresh token
///
/// The token is returned in plaintext (this is what the client stores).
/// The server stores only the SHA-256 hash.
pub fn generate_refresh_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Create, persist and return a fresh refresh token for `user_id`
pub async fn issue_refresh_token(
    store: &dyn AuthStore,
    user_id: Uuid,
    expiry_seconds: i64,
) -> Result<String, AppError> {
    let token = generate_refresh_token();
    let expires_at = Utc::now() + Duration::seconds(expiry_seconds);

    store
        .save_refresh_token(user_id, &hash_token(&token), expires_at)
        .await?;

    Ok(token)
}

/// Exchange a refresh token for a new one
///
/// The presented token is revoked whatever its state, so a token can be
/// exchanged at most once.
///
/// # Returns
/// The owning user and the replacement refresh token
///
/// # Errors
/// - `AuthError::InvalidRefreshToken` when the token is unknown or already used
/// - `AuthError::ExpiredRefreshToken` when the token is past its expiry
pub async fn rotate_refresh_token(
    store: &dyn AuthStore,
    token: &str,
    expiry_seconds: i64,
) -> Result<(Uuid, String), AppError> {
    match store.consume_refresh_token(&hash_token(token)).await? {
        ConsumedToken::NotFound => {
            tracing::warn!("Refresh token not found");
            Err(AuthError::InvalidRefreshToken.into())
        }
        ConsumedToken::Revoked => {
            tracing::warn!("Attempt to reuse a revoked refresh token");
            Err(AuthError::InvalidRefreshToken.into())
        }
        ConsumedToken::Consumed { user_id, expires_at } => {
            if expires_at < Utc::now() {
                tracing::info!(user_id = %user_id, "Refresh token expired");
                return Err(AuthError::ExpiredRefreshToken.into());
            }

            let replacement = issue_refresh_token(store, user_id, expiry_seconds).await?;
            Ok((user_id, replacement))
        }
    }
}

/// Revoke every refresh token of a user (logout)
pub async fn revoke_all_user_tokens(store: &dyn AuthStore, user_id: Uuid) -> Result<(), AppError> {
    let revoked = store.revoke_all_user_tokens(user_id).await?;
    tracing::info!(user_id = %user_id, revoked, "All refresh tokens revoked for user");
    Ok(())
}

/// Periodically delete expired and revoked refresh tokens
pub fn spawn_expired_token_cleanup(
    store: Arc<dyn AuthStore>,
    interval: StdDuration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; skip it so startup stays quiet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match store.delete_stale_tokens(Utc::now()).await {
                Ok(0) => tracing::debug!("No stale refresh tokens to delete"),
                Ok(deleted) => tracing::info!(deleted, "Deleted stale refresh tokens"),
                Err(e) => tracing::error!(error = %e, "Refresh token cleanup failed"),
            }
        }
    })
}
