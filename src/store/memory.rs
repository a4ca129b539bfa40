use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{AuthStore, ConsumedToken, LoginAttempt, NewUser, UserRecord};
use crate::error::{AppError, DatabaseError};

#[derive(Debug, Clone)]
struct TokenRow {
    user_id: Uuid,
    expires_at: DateTime<Utc>,
    is_revoked: bool,
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserRecord>,
    tokens: HashMap<String, TokenRow>,
    login_history: Vec<LoginAttempt>,
}

/// Process-local store used when no database is configured
#[derive(Default)]
pub struct InMemoryAuthStore {
    tables: Mutex<Tables>,
}

impl InMemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::Internal("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl AuthStore for InMemoryAuthStore {
    async fn insert_user(&self, user: NewUser) -> Result<UserRecord, AppError> {
        let mut tables = self.tables()?;

        if tables
            .users
            .values()
            .any(|u| u.phone_number == user.phone_number)
        {
            return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
                "Phone number already registered".to_string(),
            )));
        }

        if let Some(email) = user.email.as_deref() {
            if tables.users.values().any(|u| u.email.as_deref() == Some(email)) {
                return Err(AppError::Database(DatabaseError::UniqueConstraintViolation(
                    "Email already registered".to_string(),
                )));
            }
        }

        let record = UserRecord {
            id: Uuid::new_v4(),
            phone_number: user.phone_number,
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            account_number: user.account_number,
            login_fail_count: 0,
            is_locked: false,
            created_at: Utc::now(),
        };
        tables.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_user_by_phone(&self, phone_number: &str) -> Result<Option<UserRecord>, AppError> {
        let tables = self.tables()?;
        Ok(tables
            .users
            .values()
            .find(|u| u.phone_number == phone_number)
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError> {
        let tables = self.tables()?;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>, AppError> {
        Ok(self.tables()?.users.get(&user_id).cloned())
    }

    async fn record_login_failure(&self, user_id: Uuid, max_failures: u32) -> Result<bool, AppError> {
        let mut tables = self.tables()?;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound("user".to_string())))?;

        user.login_fail_count += 1;
        if user.login_fail_count >= max_failures as i32 {
            user.is_locked = true;
        }
        Ok(user.is_locked)
    }

    async fn reset_login_failures(&self, user_id: Uuid) -> Result<(), AppError> {
        if let Some(user) = self.tables()?.users.get_mut(&user_id) {
            user.login_fail_count = 0;
        }
        Ok(())
    }

    async fn save_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.tables()?.tokens.insert(
            token_hash.to_string(),
            TokenRow {
                user_id,
                expires_at,
                is_revoked: false,
            },
        );
        Ok(())
    }

    async fn consume_refresh_token(&self, token_hash: &str) -> Result<ConsumedToken, AppError> {
        let mut tables = self.tables()?;
        let outcome = match tables.tokens.get_mut(token_hash) {
            None => ConsumedToken::NotFound,
            Some(row) if row.is_revoked => ConsumedToken::Revoked,
            Some(row) => {
                row.is_revoked = true;
                ConsumedToken::Consumed {
                    user_id: row.user_id,
                    expires_at: row.expires_at,
                }
            }
        };
        Ok(outcome)
    }

    async fn revoke_all_user_tokens(&self, user_id: Uuid) -> Result<u64, AppError> {
        let mut tables = self.tables()?;
        let mut revoked = 0;
        for row in tables.tokens.values_mut() {
            if row.user_id == user_id && !row.is_revoked {
                row.is_revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn delete_stale_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut tables = self.tables()?;
        let before = tables.tokens.len();
        tables
            .tokens
            .retain(|_, row| !row.is_revoked && row.expires_at >= now);
        Ok((before - tables.tokens.len()) as u64)
    }

    async fn record_login_attempt(&self, attempt: LoginAttempt) -> Result<(), AppError> {
        self.tables()?.login_history.push(attempt);
        Ok(())
    }

    async fn recent_login_attempts(
        &self,
        phone_number: &str,
        limit: usize,
    ) -> Result<Vec<LoginAttempt>, AppError> {
        let tables = self.tables()?;
        Ok(tables
            .login_history
            .iter()
            .rev()
            .filter(|a| a.phone_number == phone_number)
            .take(limit)
            .cloned()
            .collect())
    }
}
