//! Expiry Monitor
//!
//! Two periodic checks of the stored access token: a foreground cadence with
//! a short look-ahead and a slower background cadence with a longer one.
//! Both refresh ahead of expiry through the coordinator and escalate when
//! there is nothing left to refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::configuration::SessionSettings;
use crate::session::coordinator::{RefreshCoordinator, RefreshOutcome};
use crate::session::escalator::{EscalationReason, Escalator};
use crate::session::state::SessionStore;
use crate::session::token::decode_access_claims;
use crate::wire::ClientConfigResponse;

pub const DEFAULT_ACCESS_CHECK_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_BACKGROUND_CHECK_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Foreground,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Token is good for at least the look-ahead window
    Valid { seconds_remaining: i64 },
    /// A refresh was attempted
    Refresh(RefreshOutcome),
    /// The session is unrecoverable and the user has been told
    Escalated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub access_check_interval: Duration,
    pub background_check_interval: Duration,
    /// Seconds before expiry at which the foreground check refreshes
    pub foreground_look_ahead: i64,
    /// Seconds before expiry at which the background check refreshes
    pub background_look_ahead: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            access_check_interval: Duration::from_millis(DEFAULT_ACCESS_CHECK_INTERVAL_MS),
            background_check_interval: Duration::from_millis(DEFAULT_BACKGROUND_CHECK_INTERVAL_MS),
            foreground_look_ahead: 30,
            background_look_ahead: 60,
        }
    }
}

impl MonitorConfig {
    /// Builds the config from the server's polling intervals. Missing or
    /// zero intervals fall back to the defaults.
    pub fn from_client_config(
        server: Option<ClientConfigResponse>,
        settings: &SessionSettings,
    ) -> Self {
        let interval = |ms: Option<u64>, default_ms: u64| {
            Duration::from_millis(ms.filter(|ms| *ms > 0).unwrap_or(default_ms))
        };

        Self {
            access_check_interval: interval(
                server.map(|c| c.access_check_interval),
                DEFAULT_ACCESS_CHECK_INTERVAL_MS,
            ),
            background_check_interval: interval(
                server.map(|c| c.background_check_interval),
                DEFAULT_BACKGROUND_CHECK_INTERVAL_MS,
            ),
            foreground_look_ahead: settings.foreground_look_ahead,
            background_look_ahead: settings.background_look_ahead,
        }
    }

    fn look_ahead(&self, cadence: Cadence) -> i64 {
        match cadence {
            Cadence::Foreground => self.foreground_look_ahead,
            Cadence::Background => self.background_look_ahead,
        }
    }

    fn period(&self, cadence: Cadence) -> Duration {
        match cadence {
            Cadence::Foreground => self.access_check_interval,
            Cadence::Background => self.background_check_interval,
        }
    }
}

pub struct ExpiryMonitor {
    store: Arc<SessionStore>,
    coordinator: Arc<RefreshCoordinator>,
    escalator: Arc<Escalator>,
    config: MonitorConfig,
}

/// Running monitor tasks. Cancelling stops future ticks; a refresh already
/// in flight is left to finish.
pub struct MonitorHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels and waits for both tasks to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

impl ExpiryMonitor {
    pub fn new(
        store: Arc<SessionStore>,
        coordinator: Arc<RefreshCoordinator>,
        escalator: Arc<Escalator>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            store,
            coordinator,
            escalator,
            config,
        }
    }

    pub fn config(&self) -> MonitorConfig {
        self.config
    }

    pub async fn check(&self, cadence: Cadence) -> TickOutcome {
        self.check_at(cadence, chrono::Utc::now().timestamp()).await
    }

    /// One tick of `cadence`, evaluated at `now` (Unix seconds)
    pub async fn check_at(&self, cadence: Cadence, now: i64) -> TickOutcome {
        if self.escalator.is_active() {
            return TickOutcome::Escalated;
        }

        let session = match self.store.load() {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read session");
                self.escalator.escalate(EscalationReason::StorageUnavailable);
                return TickOutcome::Escalated;
            }
        };

        let Some(session) = session else {
            self.escalator.escalate(EscalationReason::MissingSession);
            return TickOutcome::Escalated;
        };

        let claims = match decode_access_claims(&session.access_token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(error = %e, "Stored access token is unreadable");
                self.escalator.escalate(EscalationReason::MalformedToken);
                return TickOutcome::Escalated;
            }
        };

        let look_ahead = self.config.look_ahead(cadence);
        if !claims.needs_refresh(now, look_ahead) {
            return TickOutcome::Valid {
                seconds_remaining: claims.seconds_remaining(now),
            };
        }

        tracing::debug!(
            ?cadence,
            seconds_remaining = claims.seconds_remaining(now),
            look_ahead,
            "Access token near expiry; refreshing"
        );
        TickOutcome::Refresh(self.coordinator.refresh().await)
    }

    /// Starts both cadences. The first check of each runs immediately.
    pub fn spawn(self: Arc<Self>) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let tasks = [Cadence::Foreground, Cadence::Background]
            .into_iter()
            .map(|cadence| tokio::spawn(self.clone().run(cadence, cancel.clone())))
            .collect();

        tracing::info!(
            access_check_ms = self.config.access_check_interval.as_millis() as u64,
            background_check_ms = self.config.background_check_interval.as_millis() as u64,
            "Session monitor started"
        );

        MonitorHandle { cancel, tasks }
    }

    async fn run(self: Arc<Self>, cadence: Cadence, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.period(cadence));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let outcome = self.check(cadence).await;
                    tracing::trace!(?cadence, ?outcome, "Session check");
                }
            }
        }

        tracing::debug!(?cadence, "Session monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::coordinator::TransientFailurePolicy;
    use crate::session::escalator::test_notice::RecordingNotice;
    use crate::session::fake_api::{FakeAuthApi, RefreshBehaviour};
    use crate::session::flags::SessionFlags;
    use crate::session::state::Session;
    use crate::session::token::test_tokens::token_expiring_at;

    const NOW: i64 = 1_700_000_000;

    struct Harness {
        api: Arc<FakeAuthApi>,
        store: Arc<SessionStore>,
        notice: Arc<RecordingNotice>,
        monitor: Arc<ExpiryMonitor>,
    }

    fn harness(config: MonitorConfig) -> Harness {
        let api = Arc::new(FakeAuthApi::new());
        let store = Arc::new(SessionStore::in_memory());
        let notice = Arc::new(RecordingNotice::default());
        let escalator = Arc::new(Escalator::new(notice.clone()));
        let coordinator = Arc::new(RefreshCoordinator::new(
            api.clone(),
            store.clone(),
            Arc::new(SessionFlags::new()),
            escalator.clone(),
            TransientFailurePolicy::Escalate,
        ));
        let monitor = Arc::new(ExpiryMonitor::new(
            store.clone(),
            coordinator,
            escalator,
            config,
        ));

        Harness {
            api,
            store,
            notice,
            monitor,
        }
    }

    fn sign_in(store: &SessionStore, access_token: String) {
        store
            .save(&Session {
                access_token,
                refresh_token: "refresh-0".to_string(),
                account_number: None,
                user_name: None,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_token_outside_window_is_left_alone() {
        let h = harness(MonitorConfig::default());
        sign_in(&h.store, token_expiring_at(NOW + 600));

        assert_eq!(
            h.monitor.check_at(Cadence::Foreground, NOW).await,
            TickOutcome::Valid {
                seconds_remaining: 600
            }
        );
        assert_eq!(h.api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_foreground_refreshes_inside_look_ahead() {
        let h = harness(MonitorConfig::default());
        sign_in(&h.store, token_expiring_at(NOW + 20));

        assert_eq!(
            h.monitor.check_at(Cadence::Foreground, NOW).await,
            TickOutcome::Refresh(RefreshOutcome::Refreshed)
        );
        assert_eq!(h.api.refresh_calls(), 1);
        assert!(h.notice.shown().is_empty());
    }

    #[tokio::test]
    async fn test_background_look_ahead_is_longer() {
        let h = harness(MonitorConfig::default());
        sign_in(&h.store, token_expiring_at(NOW + 45));

        assert!(matches!(
            h.monitor.check_at(Cadence::Foreground, NOW).await,
            TickOutcome::Valid { .. }
        ));
        assert_eq!(
            h.monitor.check_at(Cadence::Background, NOW).await,
            TickOutcome::Refresh(RefreshOutcome::Refreshed)
        );
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let h = harness(MonitorConfig::default());
        sign_in(&h.store, token_expiring_at(NOW - 5));

        assert_eq!(
            h.monitor.check_at(Cadence::Foreground, NOW).await,
            TickOutcome::Refresh(RefreshOutcome::Refreshed)
        );
    }

    #[tokio::test]
    async fn test_missing_session_escalates_without_refresh() {
        let h = harness(MonitorConfig::default());

        assert_eq!(
            h.monitor.check_at(Cadence::Foreground, NOW).await,
            TickOutcome::Escalated
        );
        assert_eq!(
            h.monitor.check_at(Cadence::Background, NOW).await,
            TickOutcome::Escalated
        );

        assert_eq!(h.api.refresh_calls(), 0);
        assert_eq!(h.notice.shown(), vec![EscalationReason::MissingSession]);
    }

    #[tokio::test]
    async fn test_malformed_token_escalates() {
        let h = harness(MonitorConfig::default());
        sign_in(&h.store, "not-a-jwt".to_string());

        assert_eq!(
            h.monitor.check_at(Cadence::Foreground, NOW).await,
            TickOutcome::Escalated
        );
        assert_eq!(h.notice.shown(), vec![EscalationReason::MalformedToken]);
        assert_eq!(h.api.refresh_calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_refresh_escalates_once_across_ticks() {
        let h = harness(MonitorConfig::default());
        h.api
            .set_refresh(RefreshBehaviour::Reject("EXPIRED_REFRESH_TOKEN"));
        sign_in(&h.store, token_expiring_at(NOW - 5));

        assert_eq!(
            h.monitor.check_at(Cadence::Foreground, NOW).await,
            TickOutcome::Refresh(RefreshOutcome::Rejected)
        );
        for cadence in [Cadence::Foreground, Cadence::Background, Cadence::Foreground] {
            assert_eq!(h.monitor.check_at(cadence, NOW).await, TickOutcome::Escalated);
        }

        assert_eq!(h.api.refresh_calls(), 1);
        assert_eq!(h.notice.shown().len(), 1);
    }

    #[test]
    fn test_config_falls_back_per_interval() {
        let settings = SessionSettings::default();

        assert_eq!(
            MonitorConfig::from_client_config(None, &settings),
            MonitorConfig::default()
        );

        let config = MonitorConfig::from_client_config(
            Some(ClientConfigResponse {
                access_check_interval: 10_000,
                background_check_interval: 0,
            }),
            &settings,
        );
        assert_eq!(config.access_check_interval, Duration::from_secs(10));
        assert_eq!(config.background_check_interval, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_ticks_immediately_and_stops_on_cancel() {
        let h = harness(MonitorConfig::default());
        sign_in(&h.store, token_expiring_at(chrono::Utc::now().timestamp() + 10));

        let handle = h.monitor.clone().spawn();

        // Both cadences tick at start; only one exchange goes out
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.api.refresh_calls(), 1);

        handle.shutdown().await;

        // No further ticks even once the token is near expiry again
        sign_in(&h.store, token_expiring_at(chrono::Utc::now().timestamp() + 10));
        tokio::time::advance(Duration::from_secs(600)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.api.refresh_calls(), 1);
    }
}
