//! Connection pool management.

use herald_core::RetryPolicy;
use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{debug, info, instrument, warn};

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};

pub type PgPoolOptions = PoolOptions<Postgres>;

/// Create a pool and verify it with a round trip, retrying under
/// `reconnect` while the database is unreachable.
#[instrument(skip(config, reconnect), fields(url = %mask_password(&config.url)))]
pub async fn create_pool(config: &PostgresConfig, reconnect: &RetryPolicy) -> Result<PgPool> {
    config.validate()?;
    info!(
        max_connections = config.max_connections,
        acquire_timeout = ?config.acquire_timeout,
        "Creating PostgreSQL connection pool"
    );

    let outcome = reconnect
        .run(
            |_attempt| connect(config),
            |attempt, e: &PostgresError| {
                warn!(attempt, error = %e, "PostgreSQL connection attempt failed");
            },
        )
        .await;

    let pool = outcome.result?;
    debug!(attempts = outcome.attempts, "PostgreSQL connection pool created");
    Ok(pool)
}

async fn connect(config: &PostgresConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .test_before_acquire(false)
        .connect(&config.url)
        .await?;
    test_connection(&pool).await?;
    Ok(pool)
}

#[instrument(skip(pool))]
pub async fn test_connection(pool: &PgPool) -> Result<()> {
    sqlx_core::query::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(PostgresError::from)?;
    Ok(())
}

/// Masks the password in a database URL for logging.
pub fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.find('@')
        && let Some(colon_pos) = url[..at_pos].rfind(':')
    {
        let scheme_end = url.find("://").map(|p| p + 3).unwrap_or(0);
        if colon_pos > scheme_end {
            return format!("{}:****{}", &url[..colon_pos], &url[at_pos..]);
        }
    }
    url.to_string()
}
