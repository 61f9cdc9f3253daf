//! Repository implementations over the Unit of Work's transaction. Each
//! repository is a short-lived borrow of the transaction; stages run
//! sequentially, so only one is alive at a time.
//! Version: 1.0.0

use std::collections::HashMap;

use sqlx::{Postgres, Transaction};
use tracing::instrument;

use super::models::{
    CurrencyRow, NewPriceHistory, NewProduct, PriceHistoryRow, ProductMappingRow, ProductRow,
    ProviderRow, TrendingProductRow,
};
use super::DbError;

pub struct ProviderRepository<'a> {
    pub(super) tx: &'a mut Transaction<'static, Postgres>,
}

impl ProviderRepository<'_> {
    pub async fn all_active(&mut self) -> Result<Vec<ProviderRow>, DbError> {
        sqlx::query_as::<_, ProviderRow>(
            "SELECT id, slug, name, reliability_score, data_quality_score, is_active
             FROM providers WHERE is_active ORDER BY id",
        )
        .fetch_all(&mut **self.tx)
        .await
        .map_err(|e| DbError::query("load providers", e))
    }

    pub async fn get(&mut self, id: i32) -> Result<Option<ProviderRow>, DbError> {
        sqlx::query_as::<_, ProviderRow>(
            "SELECT id, slug, name, reliability_score, data_quality_score, is_active
             FROM providers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut **self.tx)
        .await
        .map_err(|e| DbError::query("load provider", e))
    }

    /// slug → row map for resolving collector slugs to provider ids.
    pub async fn by_slug(&mut self) -> Result<HashMap<String, ProviderRow>, DbError> {
        let rows = self.all_active().await?;
        Ok(rows.into_iter().map(|row| (row.slug.clone(), row)).collect())
    }
}

pub struct CurrencyRepository<'a> {
    pub(super) tx: &'a mut Transaction<'static, Postgres>,
}

impl CurrencyRepository<'_> {
    pub async fn all(&mut self) -> Result<Vec<CurrencyRow>, DbError> {
        sqlx::query_as::<_, CurrencyRow>(
            "SELECT id, code, symbol, name FROM currencies ORDER BY id",
        )
        .fetch_all(&mut **self.tx)
        .await
        .map_err(|e| DbError::query("load currencies", e))
    }

    /// Upper-case code → id, loaded once per batch by the price-history
    /// stage.
    pub async fn code_to_id(&mut self) -> Result<HashMap<String, i32>, DbError> {
        let rows = self.all().await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.code.to_uppercase(), row.id))
            .collect())
    }
}

pub struct ProductRepository<'a> {
    pub(super) tx: &'a mut Transaction<'static, Postgres>,
}

impl ProductRepository<'_> {
    pub async fn find_by_name(&mut self, normalized: &str) -> Result<Option<ProductRow>, DbError> {
        sqlx::query_as::<_, ProductRow>(
            "SELECT id, name, slug, brand, description, category_id, created_at
             FROM products WHERE name = $1",
        )
        .bind(normalized)
        .fetch_optional(&mut **self.tx)
        .await
        .map_err(|e| DbError::query("find product by name", e))
    }

    /// Inserts and flushes a new canonical product, returning the stored row
    /// with its id.
    #[instrument(skip(self, product), fields(name = %product.name))]
    pub async fn insert(&mut self, product: &NewProduct) -> Result<ProductRow, DbError> {
        sqlx::query_as::<_, ProductRow>(
            "INSERT INTO products (name, slug, brand, description)
             VALUES ($1, $2, $3, $4)
             RETURNING id, name, slug, brand, description, category_id, created_at",
        )
        .bind(&product.name)
        .bind(&product.slug)
        .bind(&product.brand)
        .bind(&product.description)
        .fetch_one(&mut **self.tx)
        .await
        .map_err(|e| DbError::query("insert product", e))
    }
}

pub struct ProductVariantRepository<'a> {
    pub(super) tx: &'a mut Transaction<'static, Postgres>,
}

impl ProductVariantRepository<'_> {
    /// Inserts one variant; an existing SKU is left untouched. Returns the
    /// new variant id, or None on conflict.
    pub async fn insert_if_absent(
        &mut self,
        product_id: i32,
        sku: &str,
        attributes: serde_json::Value,
    ) -> Result<Option<i32>, DbError> {
        sqlx::query_scalar::<_, i32>(
            "INSERT INTO product_variants (product_id, sku, attributes)
             VALUES ($1, $2, $3)
             ON CONFLICT (sku) DO NOTHING
             RETURNING id",
        )
        .bind(product_id)
        .bind(sku)
        .bind(attributes)
        .fetch_optional(&mut **self.tx)
        .await
        .map_err(|e| DbError::query("insert product variant", e))
    }
}

pub struct ProductMappingRepository<'a> {
    pub(super) tx: &'a mut Transaction<'static, Postgres>,
}

impl ProductMappingRepository<'_> {
    pub async fn find(
        &mut self,
        provider_id: i32,
        external_code: &str,
    ) -> Result<Option<ProductMappingRow>, DbError> {
        sqlx::query_as::<_, ProductMappingRow>(
            "SELECT id, provider_id, external_product_code, product_id, product_url
             FROM product_mappings
             WHERE provider_id = $1 AND external_product_code = $2",
        )
        .bind(provider_id)
        .bind(external_code)
        .fetch_optional(&mut **self.tx)
        .await
        .map_err(|e| DbError::query("find mapping", e))
    }

    /// Upserts the `(provider_id, external_code)` identity. Repeated calls
    /// never create a second row.
    #[instrument(skip(self))]
    pub async fn find_or_create(
        &mut self,
        provider_id: i32,
        external_code: &str,
        product_url: Option<&str>,
    ) -> Result<ProductMappingRow, DbError> {
        if let Some(existing) = self.find(provider_id, external_code).await? {
            return Ok(existing);
        }

        // The no-op DO UPDATE makes RETURNING yield the surviving row when a
        // concurrent batch won the insert race.
        sqlx::query_as::<_, ProductMappingRow>(
            "INSERT INTO product_mappings (provider_id, external_product_code, product_url)
             VALUES ($1, $2, $3)
             ON CONFLICT (provider_id, external_product_code)
             DO UPDATE SET external_product_code = EXCLUDED.external_product_code
             RETURNING id, provider_id, external_product_code, product_id, product_url",
        )
        .bind(provider_id)
        .bind(external_code)
        .bind(product_url)
        .fetch_one(&mut **self.tx)
        .await
        .map_err(|e| DbError::query("create mapping", e))
    }

    pub async fn set_product(&mut self, mapping_id: i32, product_id: i32) -> Result<(), DbError> {
        sqlx::query("UPDATE product_mappings SET product_id = $2 WHERE id = $1")
            .bind(mapping_id)
            .bind(product_id)
            .execute(&mut **self.tx)
            .await
            .map(|_| ())
            .map_err(|e| DbError::query("link mapping to product", e))
    }
}

pub struct PriceHistoryRepository<'a> {
    pub(super) tx: &'a mut Transaction<'static, Postgres>,
}

impl PriceHistoryRepository<'_> {
    /// Appends price observations in input order, returning the new row
    /// ids. History is append-only; nothing here updates or deletes.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn insert_bulk(&mut self, records: &[NewPriceHistory]) -> Result<Vec<i32>, DbError> {
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id = sqlx::query_scalar::<_, i32>(
                "INSERT INTO price_histories
                 (mapping_id, price, original_price, discount_rate, currency_id, in_stock, stock_quantity)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 RETURNING id",
            )
            .bind(record.mapping_id)
            .bind(record.price)
            .bind(record.original_price)
            .bind(record.discount_rate)
            .bind(record.currency_id)
            .bind(record.in_stock)
            .bind(record.stock_quantity)
            .fetch_one(&mut **self.tx)
            .await
            .map_err(|e| DbError::query("insert price history", e))?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Newest-first history window for one mapping. `exclude_id` keeps the
    /// row the current batch just wrote out of the window.
    pub async fn recent_for_mapping(
        &mut self,
        mapping_id: i32,
        exclude_id: Option<i32>,
        limit: i64,
    ) -> Result<Vec<PriceHistoryRow>, DbError> {
        sqlx::query_as::<_, PriceHistoryRow>(
            "SELECT id, mapping_id, price, original_price, discount_rate, currency_id,
                    in_stock, stock_quantity, created_at
             FROM price_histories
             WHERE mapping_id = $1 AND ($2::INTEGER IS NULL OR id <> $2)
             ORDER BY created_at DESC, id DESC
             LIMIT $3",
        )
        .bind(mapping_id)
        .bind(exclude_id)
        .bind(limit)
        .fetch_all(&mut **self.tx)
        .await
        .map_err(|e| DbError::query("load price history", e))
    }
}

pub struct TrendingRepository<'a> {
    pub(super) tx: &'a mut Transaction<'static, Postgres>,
}

impl TrendingRepository<'_> {
    /// Replaces the whole trending table with the given `(product_id,
    /// trend_score)` entries, ranked 1..K in input order.
    #[instrument(skip(self, entries), fields(count = entries.len()))]
    pub async fn replace_all(&mut self, entries: &[(i32, i32)]) -> Result<usize, DbError> {
        sqlx::query("DELETE FROM trending_products")
            .execute(&mut **self.tx)
            .await
            .map_err(|e| DbError::query("clear trending products", e))?;

        for (rank, (product_id, trend_score)) in entries.iter().enumerate() {
            sqlx::query(
                "INSERT INTO trending_products (product_id, trend_score, \"rank\")
                 VALUES ($1, $2, $3)",
            )
            .bind(product_id)
            .bind(trend_score)
            .bind((rank + 1) as i32)
            .execute(&mut **self.tx)
            .await
            .map_err(|e| DbError::query("insert trending product", e))?;
        }
        Ok(entries.len())
    }

    pub async fn all_ranked(&mut self) -> Result<Vec<TrendingProductRow>, DbError> {
        sqlx::query_as::<_, TrendingProductRow>(
            "SELECT id, product_id, trend_score, \"rank\", updated_at
             FROM trending_products ORDER BY \"rank\"",
        )
        .fetch_all(&mut **self.tx)
        .await
        .map_err(|e| DbError::query("load trending products", e))
    }
}
