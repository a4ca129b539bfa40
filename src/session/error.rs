use std::error::Error as StdError;
use std::fmt;

/// Refresh token expired; re-authentication required
pub const EXPIRED_REFRESH_TOKEN: &str = "EXPIRED_REFRESH_TOKEN";
/// Refresh token unknown, revoked or already rotated
pub const INVALID_REFRESH_TOKEN: &str = "INVALID_REFRESH_TOKEN";

/// Errors surfaced by the session client
#[derive(Debug)]
pub enum SessionError {
    /// The request never produced an HTTP response (connect, timeout, TLS)
    Transport(String),
    /// The server answered with a non-success status
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },
    /// A token or response body could not be decoded
    Decode(String),
    /// The local session storage failed
    Storage(String),
    /// No session is stored
    MissingSession,
}

impl SessionError {
    /// Error code the server put in the body, if any
    pub fn code(&self) -> Option<&str> {
        match self {
            SessionError::Rejected { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// HTTP status of a rejected request
    pub fn status(&self) -> Option<u16> {
        match self {
            SessionError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the refresh token itself is dead and retrying cannot help
    pub fn is_terminal_refresh_failure(&self) -> bool {
        matches!(
            self,
            SessionError::Rejected { status: 400, code: Some(code), .. }
                if code == EXPIRED_REFRESH_TOKEN || code == INVALID_REFRESH_TOKEN
        )
    }

    /// Builds a `Rejected` error from a failed response body.
    ///
    /// The code is read from the JSON `code` field (or `error`, which older
    /// servers used). Bodies that are not JSON are scanned for the two
    /// refresh-token codes so a terminal failure is never mistaken for a
    /// transient one.
    pub fn from_response_body(status: u16, body: &str) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();

        let field = |name: &str| {
            parsed
                .as_ref()
                .and_then(|v| v.get(name))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        let code = field("code").or_else(|| field("error")).or_else(|| {
            [EXPIRED_REFRESH_TOKEN, INVALID_REFRESH_TOKEN]
                .into_iter()
                .find(|code| body.contains(code))
                .map(str::to_string)
        });

        let message = field("message").unwrap_or_else(|| body.chars().take(200).collect());

        SessionError::Rejected {
            status,
            code,
            message,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Transport(msg) => write!(f, "Transport error: {}", msg),
            SessionError::Rejected {
                status,
                code: Some(code),
                message,
            } => write!(f, "Request rejected ({} {}): {}", status, code, message),
            SessionError::Rejected {
                status, message, ..
            } => write!(f, "Request rejected ({}): {}", status, message),
            SessionError::Decode(msg) => write!(f, "Decode error: {}", msg),
            SessionError::Storage(msg) => write!(f, "Session storage error: {}", msg),
            SessionError::MissingSession => write!(f, "No session is stored"),
        }
    }
}

impl StdError for SessionError {}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SessionError::Decode(err.to_string())
        } else {
            SessionError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Decode(err.to_string())
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Storage(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for SessionError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        SessionError::Decode(format!("access token: {}", err))
    }
}
