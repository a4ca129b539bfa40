//! In-process [`AuthApi`] used by the session tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::session::api::AuthApi;
use crate::session::error::SessionError;
use crate::session::token::test_tokens::token_expiring_in;
use crate::wire::{
    AuthResponse, ClientConfigResponse, LoginRequest, RegisterRequest, TokenPairResponse,
};

#[derive(Debug, Clone, Copy)]
pub(crate) enum RefreshBehaviour {
    Succeed,
    Reject(&'static str),
    ServerError,
    Unreachable,
}

pub(crate) struct FakeAuthApi {
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    refresh_tokens_seen: Mutex<Vec<String>>,
    logout_tokens_seen: Mutex<Vec<String>>,
    issued_pairs: Mutex<Vec<TokenPairResponse>>,
    behaviour: Mutex<RefreshBehaviour>,
    gate: Mutex<Option<Arc<Notify>>>,
    pub(crate) refresh_started: Notify,
    config: Mutex<Option<ClientConfigResponse>>,
}

impl FakeAuthApi {
    pub(crate) fn new() -> Self {
        Self {
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            logout_tokens_seen: Mutex::new(Vec::new()),
            issued_pairs: Mutex::new(Vec::new()),
            behaviour: Mutex::new(RefreshBehaviour::Succeed),
            gate: Mutex::new(None),
            refresh_started: Notify::new(),
            config: Mutex::new(None),
        }
    }

    pub(crate) fn set_refresh(&self, behaviour: RefreshBehaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub(crate) fn set_client_config(&self, config: ClientConfigResponse) {
        *self.config.lock().unwrap() = Some(config);
    }

    /// Refresh calls block until the returned gate is notified
    pub(crate) fn hold_refreshes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_tokens_seen(&self) -> Vec<String> {
        self.refresh_tokens_seen.lock().unwrap().clone()
    }

    pub(crate) fn logout_tokens_seen(&self) -> Vec<String> {
        self.logout_tokens_seen.lock().unwrap().clone()
    }

    /// Token pairs handed out by successful refreshes, oldest first
    pub(crate) fn issued_pairs(&self) -> Vec<TokenPairResponse> {
        self.issued_pairs.lock().unwrap().clone()
    }

    fn session_response(&self) -> AuthResponse {
        AuthResponse {
            access_token: token_expiring_in(900),
            refresh_token: "refresh-0".to_string(),
            account_number: Some("VA12345678123".to_string()),
            user_name: Some("Kim".to_string()),
            token_type: "Bearer".to_string(),
            expires_in: 900,
        }
    }
}

#[async_trait]
impl AuthApi for FakeAuthApi {
    async fn register(&self, _request: &RegisterRequest) -> Result<AuthResponse, SessionError> {
        Ok(self.session_response())
    }

    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, SessionError> {
        if request.password == "wrong-password1" {
            return Err(SessionError::from_response_body(
                401,
                r#"{"code":"INVALID_CREDENTIALS","message":"Invalid phone number or password"}"#,
            ));
        }
        Ok(self.session_response())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPairResponse, SessionError> {
        let call = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.refresh_tokens_seen
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        self.refresh_started.notify_one();

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let behaviour = *self.behaviour.lock().unwrap();
        match behaviour {
            RefreshBehaviour::Succeed => {
                let pair = TokenPairResponse {
                    access_token: token_expiring_in(900),
                    refresh_token: format!("refresh-{}", call),
                    token_type: "Bearer".to_string(),
                    expires_in: 900,
                };
                self.issued_pairs.lock().unwrap().push(pair.clone());
                Ok(pair)
            }
            RefreshBehaviour::Reject(code) => Err(SessionError::from_response_body(
                400,
                &format!(r#"{{"code":"{}","message":"rejected"}}"#, code),
            )),
            RefreshBehaviour::ServerError => {
                Err(SessionError::from_response_body(500, "Internal Server Error"))
            }
            RefreshBehaviour::Unreachable => {
                Err(SessionError::Transport("connection refused".to_string()))
            }
        }
    }

    async fn logout(&self, access_token: &str) -> Result<(), SessionError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.logout_tokens_seen
            .lock()
            .unwrap()
            .push(access_token.to_string());
        Ok(())
    }

    async fn client_config(&self) -> Result<ClientConfigResponse, SessionError> {
        self.config
            .lock()
            .unwrap()
            .ok_or_else(|| SessionError::Transport("connection refused".to_string()))
    }
}
