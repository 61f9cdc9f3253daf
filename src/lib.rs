//! Core library for the price-radar service: concurrent multi-provider
//! catalog collection, normalization and the transactional price-analytics
//! pipeline.
//!
//! Version: 1.0.0

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

pub mod cache;
pub mod collector;
pub mod config;
pub mod currency;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod resilience;
pub mod scheduler;

// Re-export core components
pub use crate::cache::{Cache, CacheError, InMemoryCache, RedisCache};
pub use crate::collector::{CollectionReport, Collector, CollectorStats, ProviderResult};
pub use crate::config::{ConfigError, Settings};
pub use crate::currency::CurrencyService;
pub use crate::db::{DbError, UnitOfWork};
pub use crate::models::{PipelineRecord, UnifiedRecord};
pub use crate::pipeline::{analysis_pipeline, Pipeline, PipelineContext, Stage};
pub use crate::resilience::{CircuitBreaker, CircuitBreakerRegistry, CircuitSnapshot};
pub use crate::scheduler::{run_batch, run_loop, BatchReport};

pub const VERSION: &str = "1.0.0";

/// Top-level bootstrap error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Root service container, constructed once at startup and passed
/// explicitly. No global singletons live anywhere below this.
pub struct Services {
    pub settings: Arc<Settings>,
    pub pool: PgPool,
    pub cache: Arc<dyn Cache>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub collector: Arc<Collector>,
    pub currency: Arc<CurrencyService>,
    pub pipeline: Arc<Pipeline>,
}

impl Services {
    /// Connects the backing stores, applies migrations, seeds reference
    /// data and wires the collector and pipeline.
    pub async fn init(settings: Settings) -> Result<Self, Error> {
        let settings = Arc::new(settings);

        let pool = db::create_pool(&settings.database_url).await?;
        db::health_check(&pool).await?;
        db::run_migrations(&pool).await?;
        db::seed_reference_data(&pool).await?;

        let cache: Arc<dyn Cache> = Arc::new(RedisCache::connect(&settings.redis_url).await?);

        Ok(Self::assemble(settings, pool, cache))
    }

    /// Wires the service graph over already-constructed backing stores.
    /// Used by `init` and by tests that substitute the cache.
    pub fn assemble(settings: Arc<Settings>, pool: PgPool, cache: Arc<dyn Cache>) -> Self {
        let breakers = Arc::new(CircuitBreakerRegistry::new());
        let collector = Arc::new(Collector::new(
            settings.clone(),
            cache.clone(),
            breakers.clone(),
        ));
        let currency = Arc::new(CurrencyService::new(
            settings.exchange_rate_url.clone(),
            settings.base_currency.clone(),
            cache.clone(),
        ));
        let pipeline = Arc::new(analysis_pipeline(currency.clone(), &settings));

        info!(version = VERSION, "services assembled");

        Self {
            settings,
            pool,
            cache,
            breakers,
            collector,
            currency,
            pipeline,
        }
    }

    /// Read-only circuit-breaker snapshot for the observability surface.
    pub fn circuit_snapshots(&self) -> Vec<CircuitSnapshot> {
        self.breakers.snapshot_all()
    }
}
