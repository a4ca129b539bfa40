use std::time::Duration;

use async_trait::async_trait;
use reqwest::Response;
use serde::de::DeserializeOwned;

use crate::session::error::SessionError;
use crate::wire::{
    AuthResponse, ClientConfigResponse, LoginRequest, RefreshRequest, RegisterRequest,
    TokenPairResponse,
};

/// The auth endpoints the session client talks to
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, SessionError>;

    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, SessionError>;

    /// Exchanges a refresh token for a rotated token pair
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPairResponse, SessionError>;

    /// Revokes the user's refresh tokens server-side
    async fn logout(&self, access_token: &str) -> Result<(), SessionError>;

    async fn client_config(&self) -> Result<ClientConfigResponse, SessionError>;
}

/// [`AuthApi`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAuthApi {
    /// Every request gives up after `timeout`, so a server that accepts the
    /// connection but never answers still produces an error
    ///
    /// # Errors
    /// `SessionError::Transport` if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SessionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    /// Absolute URL of an API path such as `/api/auth/login`
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

/// Decodes a success body, or turns the failure body into `Rejected`
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, SessionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let body = response.text().await.unwrap_or_default();
    Err(SessionError::from_response_body(status.as_u16(), &body))
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, SessionError> {
        let response = self
            .http
            .post(self.url("/api/auth/register"))
            .json(request)
            .send()
            .await?;
        read_json(response).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, SessionError> {
        let response = self
            .http
            .post(self.url("/api/auth/login"))
            .json(request)
            .send()
            .await?;
        read_json(response).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPairResponse, SessionError> {
        let response = self
            .http
            .post(self.url("/api/auth/refresh"))
            .json(&RefreshRequest {
                refresh_token: refresh_token.to_string(),
            })
            .send()
            .await?;
        read_json(response).await
    }

    async fn logout(&self, access_token: &str) -> Result<(), SessionError> {
        let response = self
            .http
            .post(self.url("/api/auth/logout"))
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SessionError::from_response_body(status.as_u16(), &body))
    }

    async fn client_config(&self) -> Result<ClientConfigResponse, SessionError> {
        let response = self
            .http
            .get(self.url("/api/auth/client-config"))
            .send()
            .await?;
        read_json(response).await
    }
}
