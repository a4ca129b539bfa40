/// Authentication Routes
///
/// Registration, login, token refresh, logout and the client polling config.

use actix_web::{http::header, web, HttpRequest, HttpResponse};
use chrono::Utc;
use uuid::Uuid;

use crate::auth::{
    generate_access_token, generate_account_number, hash_password, issue_refresh_token,
    revoke_all_user_tokens, rotate_refresh_token, verify_password, Claims,
};
use crate::configuration::{ClientSettings, JwtSettings, SecuritySettings};
use crate::error::{AppError, AuthError, ErrorContext};
use crate::store::{AuthStore, LoginAttempt, LoginOutcome, NewUser, UserRecord};
use crate::validators::{is_valid_email, is_valid_name, normalize_phone_number};
use crate::wire::{
    AuthResponse, AvailabilityResponse, ClientConfigResponse, EmailCheckQuery, LoginRequest,
    MessageResponse, PhoneCheckQuery, ProfileResponse, RefreshRequest, RegisterRequest,
    TokenPairResponse,
};

async fn issue_session(
    store: &dyn AuthStore,
    user: &UserRecord,
    jwt_config: &JwtSettings,
) -> Result<AuthResponse, AppError> {
    let access_token = generate_access_token(&user.id, &user.phone_number, jwt_config)?;
    let refresh_token =
        issue_refresh_token(store, user.id, jwt_config.refresh_token_expiry).await?;

    Ok(AuthResponse {
        access_token,
        refresh_token,
        account_number: Some(user.account_number.clone()),
        user_name: Some(user.name.clone()),
        token_type: "Bearer".to_string(),
        expires_in: jwt_config.access_token_expiry,
    })
}

/// Where a login request came from
struct LoginOrigin {
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl LoginOrigin {
    fn of(req: &HttpRequest) -> Self {
        Self {
            ip_address: req.connection_info().realip_remote_addr().map(str::to_string),
            user_agent: req
                .headers()
                .get(header::USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
        }
    }

    fn attempt(
        &self,
        phone_number: &str,
        user_id: Option<Uuid>,
        outcome: LoginOutcome,
        fail_count: i32,
        is_locked: bool,
    ) -> LoginAttempt {
        LoginAttempt {
            phone_number: phone_number.to_string(),
            user_id,
            outcome,
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
            fail_count,
            is_locked,
            attempted_at: Utc::now(),
        }
    }
}

/// History is best effort: a failed write never changes the login answer.
async fn record_login_attempt(store: &dyn AuthStore, attempt: LoginAttempt, context: &ErrorContext) {
    let outcome = attempt.outcome;
    if let Err(e) = store.record_login_attempt(attempt).await {
        tracing::warn!(
            request_id = %context.request_id,
            operation = %context.operation,
            outcome = outcome.as_str(),
            error = %e,
            "Failed to record login attempt"
        );
    }
}

/// POST /api/auth/register
///
/// # Errors
/// - 400: Validation errors (phone number, password, name, email)
/// - 409: Phone number or email already registered
pub async fn register(
    form: web::Json<RegisterRequest>,
    store: web::Data<dyn AuthStore>,
    jwt_config: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_registration");

    let phone_number = normalize_phone_number(&form.phone_number)?;
    let name = is_valid_name(&form.name)?;
    let email = match form.email.as_deref() {
        Some(email) if !email.trim().is_empty() => Some(is_valid_email(email)?),
        _ => None,
    };
    let password_hash = hash_password(&form.password)?;

    let user = store
        .insert_user(NewUser {
            phone_number,
            name,
            email,
            password_hash,
            account_number: generate_account_number(),
        })
        .await?;

    let body = issue_session(store.get_ref(), &user, jwt_config.get_ref()).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        user_id = %user.id,
        account_number = %user.account_number,
        "User registered successfully"
    );

    Ok(HttpResponse::Created().json(body))
}

/// POST /api/auth/login
///
/// # Errors
/// - 401: Unknown phone number or wrong password (same response for both)
/// - 423: Account locked after too many failed attempts
pub async fn login(
    req: HttpRequest,
    form: web::Json<LoginRequest>,
    store: web::Data<dyn AuthStore>,
    jwt_config: web::Data<JwtSettings>,
    security: web::Data<SecuritySettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_login");
    let origin = LoginOrigin::of(&req);

    // A malformed phone number cannot belong to anyone
    let (phone_number, user) = match normalize_phone_number(&form.phone_number) {
        Ok(phone_number) => {
            let user = store.find_user_by_phone(&phone_number).await?;
            (phone_number, user)
        }
        Err(_) => (form.phone_number.trim().to_string(), None),
    };

    let user = match user {
        Some(user) => user,
        None => {
            let attempt =
                origin.attempt(&phone_number, None, LoginOutcome::AccountNotFound, 0, false);
            record_login_attempt(store.get_ref(), attempt, &context).await;
            return Err(AuthError::InvalidCredentials.into());
        }
    };

    if user.is_locked {
        let attempt = origin.attempt(
            &phone_number,
            Some(user.id),
            LoginOutcome::AccountLocked,
            user.login_fail_count,
            true,
        );
        record_login_attempt(store.get_ref(), attempt, &context).await;
        return Err(AuthError::AccountLocked.into());
    }

    if !verify_password(&form.password, &user.password_hash)? {
        let locked = store
            .record_login_failure(user.id, security.max_login_failures)
            .await?;
        tracing::warn!(
            request_id = %context.request_id,
            operation = %context.operation,
            user_id = %user.id,
            locked,
            "Login failed: wrong password"
        );
        let attempt = origin.attempt(
            &phone_number,
            Some(user.id),
            LoginOutcome::WrongPassword,
            user.login_fail_count + 1,
            locked,
        );
        record_login_attempt(store.get_ref(), attempt, &context).await;
        return Err(AuthError::InvalidCredentials.into());
    }

    if user.login_fail_count > 0 {
        store.reset_login_failures(user.id).await?;
    }

    let body = issue_session(store.get_ref(), &user, jwt_config.get_ref()).await?;

    let attempt = origin.attempt(&phone_number, Some(user.id), LoginOutcome::Success, 0, false);
    record_login_attempt(store.get_ref(), attempt, &context).await;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        user_id = %user.id,
        "User logged in successfully"
    );

    Ok(HttpResponse::Ok().json(body))
}

/// POST /api/auth/refresh
///
/// Rotates the refresh token: the presented token is revoked and a new
/// access/refresh pair is returned.
///
/// # Errors
/// - 400 `INVALID_REFRESH_TOKEN`: unknown, revoked or already rotated token
/// - 400 `EXPIRED_REFRESH_TOKEN`: token past its expiry
pub async fn refresh(
    form: web::Json<RefreshRequest>,
    store: web::Data<dyn AuthStore>,
    jwt_config: web::Data<JwtSettings>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh");

    let (user_id, refresh_token) = rotate_refresh_token(
        store.get_ref(),
        &form.refresh_token,
        jwt_config.refresh_token_expiry,
    )
    .await?;

    let user = store
        .find_user_by_id(user_id)
        .await?
        .ok_or(AuthError::InvalidRefreshToken)?;

    if user.is_locked {
        revoke_all_user_tokens(store.get_ref(), user.id).await?;
        return Err(AuthError::AccountLocked.into());
    }

    let access_token = generate_access_token(&user.id, &user.phone_number, jwt_config.get_ref())?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        user_id = %user_id,
        "Token refreshed successfully"
    );

    Ok(HttpResponse::Ok().json(TokenPairResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: jwt_config.access_token_expiry,
    }))
}

/// POST /api/auth/logout
///
/// **Requires valid JWT access token.** Revokes every refresh token the
/// user holds.
pub async fn logout(
    claims: web::ReqData<Claims>,
    store: web::Data<dyn AuthStore>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_logout").with_user_id(claims.sub.clone());
    let user_id = claims.user_id()?;

    revoke_all_user_tokens(store.get_ref(), user_id).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        user_id = ?context.user_id,
        "User logged out"
    );

    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "Logged out".to_string(),
    }))
}

/// GET /api/auth/client-config
pub async fn client_config(client: web::Data<ClientSettings>) -> HttpResponse {
    HttpResponse::Ok().json(ClientConfigResponse {
        access_check_interval: client.access_check_interval,
        background_check_interval: client.background_check_interval,
    })
}

/// GET /api/auth/check-phone?phoneNumber=...
pub async fn check_phone(
    query: web::Query<PhoneCheckQuery>,
    store: web::Data<dyn AuthStore>,
) -> Result<HttpResponse, AppError> {
    let phone_number = normalize_phone_number(&query.phone_number)?;
    let taken = store.find_user_by_phone(&phone_number).await?.is_some();

    Ok(HttpResponse::Ok().json(AvailabilityResponse { available: !taken }))
}

/// GET /api/auth/check-email?email=...
///
/// # Errors
/// - 400: Malformed email
pub async fn check_email(
    query: web::Query<EmailCheckQuery>,
    store: web::Data<dyn AuthStore>,
) -> Result<HttpResponse, AppError> {
    let email = is_valid_email(&query.email)?;
    let taken = store.find_user_by_email(&email).await?.is_some();

    Ok(HttpResponse::Ok().json(AvailabilityResponse { available: !taken }))
}

/// GET /api/auth/profile
///
/// **Requires valid JWT access token.**
pub async fn profile(
    claims: web::ReqData<Claims>,
    store: web::Data<dyn AuthStore>,
) -> Result<HttpResponse, AppError> {
    let user_id = claims.user_id()?;

    let user = store
        .find_user_by_id(user_id)
        .await?
        .ok_or(AuthError::TokenInvalid)?;

    Ok(HttpResponse::Ok().json(ProfileResponse {
        id: user.id.to_string(),
        phone_number: user.phone_number,
        name: user.name,
        email: user.email,
        account_number: user.account_number,
        created_at: user.created_at.to_rfc3339(),
    }))
}
