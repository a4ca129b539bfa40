use config::ConfigError;

use crate::session::TransientFailurePolicy;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    /// When absent the server keeps users and refresh tokens in memory
    #[serde(default)]
    pub database: Option<DatabaseSettings>,
    pub jwt: JwtSettings,
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub maintenance: MaintenanceSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }
}

/// JWT authentication settings
#[derive(serde::Deserialize, Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub access_token_expiry: i64,   // seconds (e.g., 900 for 15 minutes)
    pub refresh_token_expiry: i64,  // seconds (e.g., 604800 for 7 days)
    pub issuer: String,
}

/// Polling cadence handed to session clients by `GET /api/auth/client-config`
#[derive(serde::Deserialize, Clone, Debug)]
pub struct ClientSettings {
    pub access_check_interval: u64,      // milliseconds
    pub background_check_interval: u64,  // milliseconds
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            access_check_interval: 30_000,
            background_check_interval: 60_000,
        }
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct SecuritySettings {
    /// Consecutive failed logins before the account is locked
    pub max_login_failures: u32,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self { max_login_failures: 5 }
    }
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct MaintenanceSettings {
    /// Seconds between sweeps of expired refresh tokens
    pub token_cleanup_interval: u64,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self { token_cleanup_interval: 300 }
    }
}

/// Loads server settings from `configuration.yaml` (optional) overlaid with
/// `APP__SECTION__KEY` environment variables.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()?;
    settings.try_deserialize::<Settings>()
}

/// Settings for an embedded session client
#[derive(serde::Deserialize, Clone, Debug)]
pub struct SessionSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// JSON file the session survives restarts in; memory only when absent
    #[serde(default)]
    pub storage_path: Option<String>,
    /// Seconds before expiry at which the foreground check refreshes
    #[serde(default = "default_foreground_look_ahead")]
    pub foreground_look_ahead: i64,
    /// Seconds before expiry at which the background check refreshes
    #[serde(default = "default_background_look_ahead")]
    pub background_look_ahead: i64,
    #[serde(default)]
    pub transient_failure_policy: TransientFailurePolicy,
    /// Milliseconds before an auth request is abandoned
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8090".to_string()
}

fn default_foreground_look_ahead() -> i64 {
    30
}

fn default_background_look_ahead() -> i64 {
    60
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            storage_path: None,
            foreground_look_ahead: default_foreground_look_ahead(),
            background_look_ahead: default_background_look_ahead(),
            transient_failure_policy: TransientFailurePolicy::default(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Loads client settings from `session.yaml` (optional) overlaid with
/// `EASYPAY_SESSION__KEY` environment variables.
pub fn get_session_configuration() -> Result<SessionSettings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("session").required(false))
        .add_source(config::Environment::with_prefix("EASYPAY_SESSION").separator("__"))
        .build()?;
    settings.try_deserialize::<SessionSettings>()
}
