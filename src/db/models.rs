//! Row types mirroring the persistence schema, plus insert DTOs.
//!
//! Version dependencies:
//! - sqlx = "0.7"
//! - rust_decimal = "1.32"
//! - chrono = "0.4"

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct ProviderRow {
    pub id: i32,
    pub slug: String,
    pub name: String,
    pub reliability_score: Decimal,
    pub data_quality_score: Option<i32>,
    pub is_active: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct CurrencyRow {
    pub id: i32,
    pub code: String,
    pub symbol: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProductRow {
    pub id: i32,
    pub name: String,
    pub slug: Option<String>,
    pub brand: Option<String>,
    pub description: Option<String>,
    pub category_id: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Fields for a new canonical product. The stored name is the normalized
/// form (lowercase, collapsed whitespace).
#[derive(Debug, Clone)]
pub struct NewProduct {
    pub name: String,
    pub slug: String,
    pub brand: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProductVariantRow {
    pub id: i32,
    pub product_id: i32,
    pub sku: Option<String>,
    pub attributes: serde_json::Value,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProductMappingRow {
    pub id: i32,
    pub provider_id: Option<i32>,
    pub external_product_code: String,
    pub product_id: Option<i32>,
    pub product_url: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct PriceHistoryRow {
    pub id: i32,
    pub mapping_id: Option<i32>,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    pub discount_rate: Option<i32>,
    pub currency_id: i32,
    pub in_stock: bool,
    pub stock_quantity: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// One price observation to append to the history.
#[derive(Debug, Clone)]
pub struct NewPriceHistory {
    pub mapping_id: i32,
    pub price: Decimal,
    pub original_price: Option<Decimal>,
    pub discount_rate: Option<i32>,
    pub currency_id: i32,
    pub in_stock: bool,
    pub stock_quantity: Option<i32>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TrendingProductRow {
    pub id: i32,
    pub product_id: i32,
    pub trend_score: i32,
    pub rank: i32,
    pub updated_at: DateTime<Utc>,
}
