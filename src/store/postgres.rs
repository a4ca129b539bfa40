use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{AuthStore, ConsumedToken, LoginAttempt, LoginOutcome, NewUser, UserRecord};
use crate::error::{AppError, DatabaseError};

type UserRow = (
    Uuid,
    String,
    String,
    Option<String>,
    String,
    String,
    i32,
    bool,
    DateTime<Utc>,
);

const USER_COLUMNS: &str = "id, phone_number, name, email, password_hash, account_number, \
                            login_fail_count, is_locked, created_at";

fn into_record(row: UserRow) -> UserRecord {
    let (
        id,
        phone_number,
        name,
        email,
        password_hash,
        account_number,
        login_fail_count,
        is_locked,
        created_at,
    ) = row;
    UserRecord {
        id,
        phone_number,
        name,
        email,
        password_hash,
        account_number,
        login_fail_count,
        is_locked,
        created_at,
    }
}

type LoginHistoryRow = (
    String,
    Option<Uuid>,
    String,
    Option<String>,
    Option<String>,
    i32,
    bool,
    DateTime<Utc>,
);

fn into_attempt(row: LoginHistoryRow) -> Result<LoginAttempt, AppError> {
    let (phone_number, user_id, result, ip_address, user_agent, fail_count, is_locked, attempted_at) =
        row;
    let outcome = LoginOutcome::parse(&result).ok_or_else(|| {
        AppError::Database(DatabaseError::UnexpectedError(format!(
            "Unknown login result: {}",
            result
        )))
    })?;
    Ok(LoginAttempt {
        phone_number,
        user_id,
        outcome,
        ip_address,
        user_agent,
        fail_count,
        is_locked,
        attempted_at,
    })
}

/// Postgres-backed store
#[derive(Clone)]
pub struct PgAuthStore {
    pool: PgPool,
}

impl PgAuthStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled migrations
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::UnexpectedError(e.to_string())))
    }
}

#[async_trait]
impl AuthStore for PgAuthStore {
    async fn insert_user(&self, user: NewUser) -> Result<UserRecord, AppError> {
        let now = Utc::now();
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, phone_number, name, email, password_hash, account_number, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&user.phone_number)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.account_number)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(into_record(row))
    }

    async fn find_user_by_phone(&self, phone_number: &str) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE phone_number = $1",
            USER_COLUMNS
        ))
        .bind(phone_number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(into_record))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(into_record))
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<UserRecord>, AppError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(into_record))
    }

    async fn record_login_failure(&self, user_id: Uuid, max_failures: u32) -> Result<bool, AppError> {
        let is_locked = sqlx::query_scalar::<_, bool>(
            r#"
            UPDATE users
            SET login_fail_count = login_fail_count + 1,
                is_locked = is_locked OR login_fail_count + 1 >= $2,
                updated_at = $3
            WHERE id = $1
            RETURNING is_locked
            "#,
        )
        .bind(user_id)
        .bind(max_failures as i32)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(is_locked)
    }

    async fn reset_login_failures(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET login_fail_count = 0, updated_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_refresh_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn consume_refresh_token(&self, token_hash: &str) -> Result<ConsumedToken, AppError> {
        // The conditional UPDATE is the single point of rotation: only one
        // caller can flip is_revoked for a given hash.
        let consumed = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = true, revoked_at = $1
            WHERE token_hash = $2 AND is_revoked = false
            RETURNING user_id, expires_at
            "#,
        )
        .bind(Utc::now())
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((user_id, expires_at)) = consumed {
            return Ok(ConsumedToken::Consumed { user_id, expires_at });
        }

        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM refresh_tokens WHERE token_hash = $1)",
        )
        .bind(token_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(if exists {
            ConsumedToken::Revoked
        } else {
            ConsumedToken::NotFound
        })
    }

    async fn revoke_all_user_tokens(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET is_revoked = true, revoked_at = $1
            WHERE user_id = $2 AND is_revoked = false
            "#,
        )
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_stale_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1 OR is_revoked = true")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn record_login_attempt(&self, attempt: LoginAttempt) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO login_history
                (id, user_id, phone_number, result, ip_address, user_agent, fail_count, is_locked, attempted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(attempt.user_id)
        .bind(&attempt.phone_number)
        .bind(attempt.outcome.as_str())
        .bind(&attempt.ip_address)
        .bind(&attempt.user_agent)
        .bind(attempt.fail_count)
        .bind(attempt.is_locked)
        .bind(attempt.attempted_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_login_attempts(
        &self,
        phone_number: &str,
        limit: usize,
    ) -> Result<Vec<LoginAttempt>, AppError> {
        let rows = sqlx::query_as::<_, LoginHistoryRow>(
            r#"
            SELECT phone_number, user_id, result, ip_address, user_agent, fail_count, is_locked, attempted_at
            FROM login_history
            WHERE phone_number = $1
            ORDER BY attempted_at DESC
            LIMIT $2
            "#,
        )
        .bind(phone_number)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(into_attempt).collect()
    }
}
