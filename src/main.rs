use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use easypay::auth::spawn_expired_token_cleanup;
use easypay::configuration::get_configuration;
use easypay::startup::run;
use easypay::store::{AuthStore, InMemoryAuthStore, PgAuthStore};
use easypay::telemetry::init_telemetry;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Configuration error",
            ));
        }
    };

    let store: Arc<dyn AuthStore> = match &configuration.database {
        Some(database) => {
            tracing::info!(host = %database.host, database = %database.database_name, "Connecting to database");

            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&database.connection_string())
                .await
                .map_err(|e| {
                    tracing::error!("Failed to create connection pool: {}", e);
                    std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "Database connection error",
                    )
                })?;

            let store = PgAuthStore::new(pool);
            store.migrate().await.map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                std::io::Error::new(std::io::ErrorKind::Other, "Migration error")
            })?;

            tracing::info!("Database ready");
            Arc::new(store)
        }
        None => {
            tracing::warn!("No database configured; users and sessions are kept in memory");
            Arc::new(InMemoryAuthStore::new())
        }
    };

    let _cleanup = spawn_expired_token_cleanup(
        store.clone(),
        Duration::from_secs(configuration.maintenance.token_cleanup_interval.max(1)),
    );

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    let server = run(
        listener,
        store,
        configuration.jwt,
        configuration.client,
        configuration.security,
    )?;

    server.await
}
