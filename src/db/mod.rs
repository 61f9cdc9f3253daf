//! Database module: PostgreSQL pool management, migrations and the
//! transactional Unit of Work used by the analysis pipeline.
//! Version: 1.0.0

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::time::{sleep, Duration};
use tracing::{info, instrument, warn};

pub mod models;
pub mod repositories;
pub mod unit_of_work;

pub use unit_of_work::{seed_reference_data, UnitOfWork};

// Global constants
const DB_POOL_MAX_CONNECTIONS: u32 = 20;
const DB_CONNECT_TIMEOUT_SECONDS: u64 = 30;
const DB_CONNECT_RETRIES: u32 = 3;

/// Database error with operation context.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("query error: {context}: {source}")]
    Query {
        context: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("migration error: {0}")]
    Migration(String),
}

impl DbError {
    pub fn query(context: impl Into<String>, source: sqlx::Error) -> Self {
        DbError::Query {
            context: context.into(),
            source,
        }
    }
}

/// Creates the PostgreSQL connection pool, retrying transient connect
/// failures.
#[instrument(skip(database_url))]
pub async fn create_pool(database_url: &str) -> Result<PgPool, DbError> {
    info!("initializing database connection pool");

    let mut last_error = None;
    for attempt in 1..=DB_CONNECT_RETRIES {
        match PgPoolOptions::new()
            .max_connections(DB_POOL_MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(DB_CONNECT_TIMEOUT_SECONDS))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                info!("database connection pool ready");
                return Ok(pool);
            }
            Err(e) => {
                warn!(attempt, error = %e, "database connection attempt failed");
                last_error = Some(e);
                sleep(Duration::from_secs(1)).await;
            }
        }
    }

    Err(DbError::Connection(
        last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no connection attempt made".to_string()),
    ))
}

/// Applies pending migrations from `./migrations`.
#[instrument(skip(pool))]
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;
    info!("database migrations applied");
    Ok(())
}

/// Lightweight connectivity probe.
pub async fn health_check(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(|e| DbError::query("health check", e))
}
