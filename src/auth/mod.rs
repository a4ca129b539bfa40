/// Authentication module
///
/// Handles JWT token generation/validation, password hashing,
/// refresh token rotation and account number issuing.

mod account_number;
mod claims;
mod jwt;
mod password;
mod refresh_token;

pub use account_number::generate_account_number;
pub use claims::Claims;
pub use jwt::generate_access_token;
pub use jwt::validate_access_token;
pub use password::hash_password;
pub use password::verify_password;
pub use refresh_token::generate_refresh_token;
pub use refresh_token::issue_refresh_token;
pub use refresh_token::rotate_refresh_token;
pub use refresh_token::revoke_all_user_tokens;
pub use refresh_token::spawn_expired_token_cleanup;
