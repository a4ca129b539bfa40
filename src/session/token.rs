//! Client-side view of an access token.
//!
//! The client cannot verify the signature (it has no key); it only reads the
//! expiry so it can refresh ahead of time. The server remains the authority.

use std::collections::HashSet;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::session::error::SessionError;

#[derive(Debug, Clone, Deserialize)]
pub struct AccessClaims {
    /// Expiry, seconds since the Unix epoch
    pub exp: i64,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default, rename = "phoneNumber")]
    pub phone_number: Option<String>,
}

impl AccessClaims {
    /// Seconds until expiry; negative once expired
    pub fn seconds_remaining(&self, now: i64) -> i64 {
        self.exp - now
    }

    /// True when the token is expired or will expire within `look_ahead`
    /// seconds of `now`
    pub fn needs_refresh(&self, now: i64, look_ahead: i64) -> bool {
        now >= self.exp || self.seconds_remaining(now) < look_ahead
    }
}

/// Reads the claims of an access token without checking its signature
///
/// # Errors
/// `SessionError::Decode` if the token is not a JWT or carries no `exp`
pub fn decode_access_claims(token: &str) -> Result<AccessClaims, SessionError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::from(["exp".to_string()]);

    let data = decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

/// True if `token` decodes and has not expired yet
pub fn is_token_valid(token: &str, now: i64) -> bool {
    decode_access_claims(token)
        .map(|claims| claims.exp > now)
        .unwrap_or(false)
}
