//! Authenticated Request Wrapper

use std::sync::Arc;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::session::api::read_json;
use crate::session::coordinator::RefreshCoordinator;
use crate::session::error::SessionError;
use crate::session::state::SessionStore;

/// Sends requests with the stored bearer token. A 401 triggers one refresh
/// and one retry; a second 401 is returned to the caller as-is.
#[derive(Clone)]
pub struct AuthorizedClient {
    http: reqwest::Client,
    store: Arc<SessionStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthorizedClient {
    pub fn new(
        http: reqwest::Client,
        store: Arc<SessionStore>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            http,
            store,
            coordinator,
        }
    }

    /// `build` is called once per attempt, so it must be able to rebuild
    /// the request (including its body) from scratch
    pub async fn send<F>(&self, build: F) -> Result<Response, SessionError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let response = self.send_once(&build).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let outcome = self.coordinator.refresh().await;
        if !outcome.is_refreshed() {
            tracing::debug!(?outcome, "Refresh after 401 did not succeed; returning 401");
            return Ok(response);
        }

        tracing::debug!("Retrying request with refreshed access token");
        self.send_once(&build).await
    }

    /// [`send`](Self::send), then decode a JSON body. Non-success responses
    /// become `SessionError::Rejected`.
    pub async fn send_json<T, F>(&self, build: F) -> Result<T, SessionError>
    where
        T: DeserializeOwned,
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let response = self.send(build).await?;
        read_json(response).await
    }

    async fn send_once<F>(&self, build: &F) -> Result<Response, SessionError>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let mut request = build(&self.http);
        if let Some(token) = self.store.access_token()? {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }
}
