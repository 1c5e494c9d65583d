//! Connection pool and schema setup for the invitation store.

use sqlx::migrate::MigrateError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tracing::info;

/// Pool sizing and timeouts.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Opens the pool. Connections are checked before being handed out so a
/// restarted database surfaces as a retryable store error, not a broken pipe.
pub async fn connect(settings: &PoolSettings) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(settings.idle_timeout_secs))
        .test_before_acquire(true)
        .connect(&settings.url)
        .await?;
    info!(
        max_connections = settings.max_connections,
        "Invitation store pool ready"
    );
    Ok(pool)
}

/// Creates the profile and invitation tables and the atomic issuance function.
pub async fn migrate(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("./src/migrations").run(pool).await?;
    info!("Invitation store schema up to date");
    Ok(())
}
