use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::configuration::SessionSettings;
use crate::session::api::{AuthApi, HttpAuthApi};
use crate::session::coordinator::{RefreshCoordinator, RefreshOutcome};
use crate::session::error::SessionError;
use crate::session::escalator::{Escalator, ExpiryNotice, TracingNotice};
use crate::session::flags::SessionFlags;
use crate::session::monitor::{ExpiryMonitor, MonitorConfig, MonitorHandle};
use crate::session::request::AuthorizedClient;
use crate::session::state::{FileStorage, KeyValueStorage, MemoryStorage, Session, SessionStore};
use crate::session::token::{decode_access_claims, is_token_valid};
use crate::wire::{LoginRequest, RegisterRequest};

/// Client-side session lifecycle: sign-in, background refresh, expiry
/// notice and sign-out, wired around one shared store and flag set.
pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    store: Arc<SessionStore>,
    flags: Arc<SessionFlags>,
    escalator: Arc<Escalator>,
    coordinator: Arc<RefreshCoordinator>,
    settings: SessionSettings,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl SessionManager {
    pub fn new(
        api: Arc<dyn AuthApi>,
        storage: Arc<dyn KeyValueStorage>,
        notice: Arc<dyn ExpiryNotice>,
        settings: SessionSettings,
    ) -> Self {
        let store = Arc::new(SessionStore::new(storage));
        let flags = Arc::new(SessionFlags::new());
        let escalator = Arc::new(Escalator::new(notice));
        let coordinator = Arc::new(RefreshCoordinator::new(
            api.clone(),
            store.clone(),
            flags.clone(),
            escalator.clone(),
            settings.transient_failure_policy,
        ));

        Self {
            api,
            store,
            flags,
            escalator,
            coordinator,
            settings,
            monitor: Mutex::new(None),
        }
    }

    /// HTTP client against `settings.base_url`, file-backed when a storage
    /// path is configured, notices rendered to the log
    ///
    /// # Errors
    /// `SessionError::Transport` if the HTTP client cannot be built
    pub fn from_settings(settings: SessionSettings) -> Result<Self, SessionError> {
        let api = Arc::new(HttpAuthApi::new(
            settings.base_url.clone(),
            Duration::from_millis(settings.request_timeout_ms),
        )?);
        let storage: Arc<dyn KeyValueStorage> = match &settings.storage_path {
            Some(path) => Arc::new(FileStorage::new(path)),
            None => Arc::new(MemoryStorage::new()),
        };
        Ok(Self::new(api, storage, Arc::new(TracingNotice), settings))
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn escalator(&self) -> &Arc<Escalator> {
        &self.escalator
    }

    pub fn flags(&self) -> &Arc<SessionFlags> {
        &self.flags
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn session(&self) -> Result<Option<Session>, SessionError> {
        self.store.load()
    }

    /// Request wrapper sharing this manager's store and coordinator
    pub fn authorized_client(&self, http: reqwest::Client) -> AuthorizedClient {
        AuthorizedClient::new(http, self.store.clone(), self.coordinator.clone())
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<Session, SessionError> {
        let response = self.api.register(request).await?;
        self.begin_session(response.into())
    }

    pub async fn login(&self, phone_number: &str, password: &str) -> Result<Session, SessionError> {
        let response = self
            .api
            .login(&LoginRequest {
                phone_number: phone_number.to_string(),
                password: password.to_string(),
            })
            .await?;
        self.begin_session(response.into())
    }

    fn begin_session(&self, session: Session) -> Result<Session, SessionError> {
        self.store.save(&session)?;
        // A stale expiry notice does not apply to the new session
        self.escalator.acknowledge();
        tracing::info!(
            account_number = session.account_number.as_deref().unwrap_or("-"),
            "Signed in"
        );
        Ok(session)
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        self.coordinator.refresh().await
    }

    /// True if a readable, unexpired access token is stored
    pub fn is_token_valid(&self) -> bool {
        match self.store.access_token() {
            Ok(Some(token)) => is_token_valid(&token, chrono::Utc::now().timestamp()),
            _ => false,
        }
    }

    /// Refreshes when the stored access token is expired or within the
    /// foreground look-ahead window. Returns whether a usable token is
    /// stored afterwards.
    pub async fn ensure_valid_token(&self) -> bool {
        let needs_refresh = match self.store.access_token() {
            Ok(Some(token)) => match decode_access_claims(&token) {
                Ok(claims) => claims.needs_refresh(
                    chrono::Utc::now().timestamp(),
                    self.settings.foreground_look_ahead,
                ),
                Err(_) => true,
            },
            Ok(None) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read access token");
                return false;
            }
        };

        if !needs_refresh {
            return true;
        }

        match self.coordinator.refresh().await {
            RefreshOutcome::Refreshed => true,
            // Someone else is refreshing; usable if the current token has not expired yet
            RefreshOutcome::InFlight => self.is_token_valid(),
            _ => false,
        }
    }

    /// Polling intervals from the server, or the defaults when the server
    /// cannot be reached
    pub async fn load_monitor_config(&self) -> MonitorConfig {
        let server = match self.api.client_config().await {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load client config; using defaults");
                None
            }
        };
        MonitorConfig::from_client_config(server, &self.settings)
    }

    /// Loads the polling config and starts the expiry monitor, replacing
    /// any monitor already running
    pub async fn start_monitor(&self) -> Result<(), SessionError> {
        let config = self.load_monitor_config().await;
        self.start_monitor_with(config)
    }

    pub fn start_monitor_with(&self, config: MonitorConfig) -> Result<(), SessionError> {
        let monitor = Arc::new(ExpiryMonitor::new(
            self.store.clone(),
            self.coordinator.clone(),
            self.escalator.clone(),
            config,
        ));

        let mut slot = self
            .monitor
            .lock()
            .map_err(|_| SessionError::Storage("monitor lock poisoned".to_string()))?;
        if let Some(previous) = slot.replace(monitor.spawn()) {
            previous.cancel();
        }
        Ok(())
    }

    pub fn stop_monitor(&self) {
        match self.monitor.lock() {
            Ok(mut slot) => {
                if let Some(handle) = slot.take() {
                    handle.cancel();
                }
            }
            Err(_) => tracing::error!("Monitor lock poisoned; monitor left running"),
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .map(|slot| slot.as_ref().map_or(false, |h| !h.is_cancelled()))
            .unwrap_or(false)
    }

    /// Signs out. Local state is cleared first so the user is signed out
    /// even if the server cannot be reached. Returns `false` if a logout
    /// was already in progress.
    #[tracing::instrument(name = "logout", skip(self))]
    pub async fn logout(&self) -> bool {
        let Some(_logging_out) = self.flags.try_begin_logout() else {
            tracing::debug!("Logout already in progress");
            return false;
        };

        self.stop_monitor();

        // Read before clearing; the server call needs it
        let access_token = match self.store.access_token() {
            Ok(token) => token,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read access token for logout");
                None
            }
        };

        if let Err(e) = self.store.clear() {
            tracing::error!(error = %e, "Failed to clear session storage");
        }

        if let Some(token) = access_token {
            if let Err(e) = self.api.logout(&token).await {
                tracing::warn!(error = %e, "Server-side logout failed; local session cleared");
            }
        }

        tracing::info!("Signed out");
        true
    }

    /// The user dismissed the "session expired" notice: clear the session
    /// and re-arm the escalator. Does nothing if no notice is showing.
    pub async fn acknowledge_expiry(&self) -> bool {
        if !self.escalator.is_active() {
            return false;
        }

        self.logout().await;
        self.escalator.acknowledge()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_monitor();
    }
}
