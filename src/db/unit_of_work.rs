//! Unit of Work: one scoped transaction exposing the repository accessors
//! the pipeline stages use. Writes commit or roll back atomically; the UoW
//! is never shared across concurrent tasks.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{info, instrument};

use super::repositories::{
    CurrencyRepository, PriceHistoryRepository, ProductMappingRepository, ProductRepository,
    ProductVariantRepository, ProviderRepository, TrendingRepository,
};
use super::DbError;

/// The four known providers with their reliability and data-quality scores,
/// derived from their observed error rates.
const PROVIDER_SEEDS: [(&str, &str, f64, i32); 4] = [
    ("sport-direct", "SportDirect", 0.99, 95),
    ("outdoor-pro", "OutdoorPro", 0.95, 90),
    ("dag-spor", "DagSpor", 0.85, 75),
    ("alpine-gear", "AlpineGear", 0.70, 60),
];

const CURRENCY_SEEDS: [(&str, &str, &str); 4] = [
    ("TRY", "₺", "Turkish Lira"),
    ("USD", "$", "US Dollar"),
    ("EUR", "€", "Euro"),
    ("GBP", "£", "Pound Sterling"),
];

/// Scoped transaction with repository accessors. Only one repository borrow
/// is alive at a time, which matches the strictly sequential stage order.
pub struct UnitOfWork {
    tx: Transaction<'static, Postgres>,
}

impl UnitOfWork {
    #[instrument(skip(pool))]
    pub async fn begin(pool: &PgPool) -> Result<Self, DbError> {
        let tx = pool
            .begin()
            .await
            .map_err(|e| DbError::query("begin transaction", e))?;
        Ok(Self { tx })
    }

    pub async fn commit(self) -> Result<(), DbError> {
        self.tx
            .commit()
            .await
            .map_err(|e| DbError::query("commit transaction", e))
    }

    pub async fn rollback(self) -> Result<(), DbError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| DbError::query("rollback transaction", e))
    }

    pub fn providers(&mut self) -> ProviderRepository<'_> {
        ProviderRepository { tx: &mut self.tx }
    }

    pub fn currencies(&mut self) -> CurrencyRepository<'_> {
        CurrencyRepository { tx: &mut self.tx }
    }

    pub fn products(&mut self) -> ProductRepository<'_> {
        ProductRepository { tx: &mut self.tx }
    }

    pub fn product_variants(&mut self) -> ProductVariantRepository<'_> {
        ProductVariantRepository { tx: &mut self.tx }
    }

    pub fn product_mappings(&mut self) -> ProductMappingRepository<'_> {
        ProductMappingRepository { tx: &mut self.tx }
    }

    pub fn price_histories(&mut self) -> PriceHistoryRepository<'_> {
        PriceHistoryRepository { tx: &mut self.tx }
    }

    pub fn trending_products(&mut self) -> TrendingRepository<'_> {
        TrendingRepository { tx: &mut self.tx }
    }
}

/// Idempotently ensures the known providers and base currencies exist.
/// Runs once at startup in its own transaction.
#[instrument(skip(pool))]
pub async fn seed_reference_data(pool: &PgPool) -> Result<(), DbError> {
    let mut uow = UnitOfWork::begin(pool).await?;

    for (slug, name, reliability, quality) in PROVIDER_SEEDS {
        let score = Decimal::from_f64(reliability).unwrap_or(Decimal::ONE);
        sqlx::query(
            "INSERT INTO providers (slug, name, reliability_score, data_quality_score)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (slug) DO NOTHING",
        )
        .bind(slug)
        .bind(name)
        .bind(score)
        .bind(quality)
        .execute(&mut *uow.tx)
        .await
        .map_err(|e| DbError::query("seed provider", e))?;
    }

    for (code, symbol, name) in CURRENCY_SEEDS {
        sqlx::query(
            "INSERT INTO currencies (code, symbol, name)
             VALUES ($1, $2, $3)
             ON CONFLICT (code) DO NOTHING",
        )
        .bind(code)
        .bind(symbol)
        .bind(name)
        .execute(&mut *uow.tx)
        .await
        .map_err(|e| DbError::query("seed currency", e))?;
    }

    uow.commit().await?;
    info!("reference data seeded");
    Ok(())
}
