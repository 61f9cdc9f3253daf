//! Uniform product records: the collector's output shape and the annotated
//! record that flows through the analysis pipeline.
//!
//! Version dependencies:
//! - serde = "1.0"
//! - chrono = "0.4"
//! - rust_decimal = "1.32"

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Raw price as delivered by a provider. Providers disagree on typing: some
/// send numbers, some send formatted strings ("$1,234.56", "1.234,56 ₺").
/// Parsing happens in the currency-normalization stage, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriceValue {
    Number(f64),
    Text(String),
}

impl std::fmt::Display for PriceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceValue::Number(n) => write!(f, "{}", n),
            PriceValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A single product as seen by one provider, adapted into the common shape.
/// This is what the collector caches and what a batch hands to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedRecord {
    pub provider_slug: String,
    pub external_code: String,
    pub name: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub price: PriceValue,
    pub currency_code: String,
    pub in_stock: bool,
    pub stock_quantity: Option<i32>,
    pub product_url: Option<String>,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub sizes: Vec<String>,
    pub collected_at: DateTime<Utc>,
}

/// Price fields produced by the currency-normalization stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedPrice {
    pub original_price: Decimal,
    pub original_currency: String,
    /// Converted to the base currency, rounded to 2 decimals.
    pub price: Decimal,
    pub currency: String,
}

/// Direction of recent price movement relative to the history window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Up => "up",
            TrendDirection::Down => "down",
            TrendDirection::Stable => "stable",
        }
    }
}

/// Output of the trend-analysis stage for one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendMetrics {
    /// Integer in [-100, +100]; negative = falling, positive = rising.
    pub trend_score: i32,
    pub trend_direction: TrendDirection,
    pub price_change_percent: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub has_sufficient_data: bool,
}

/// Output of the profit-margin stage for one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginMetrics {
    pub market_avg_price: f64,
    pub profit_margin_percent: f64,
    pub weighted_profit_margin: f64,
    pub is_arbitrage_opportunity: bool,
    pub has_market_data: bool,
}

/// Output of the reliability-weighting stage for one record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightMetrics {
    pub reliability_score: f64,
    pub data_quality_score: i32,
    /// Combined confidence in [0, 1]: (reliability + quality/100) / 2.
    pub confidence_level: f64,
    pub weighted_trend_score: f64,
    pub weighted_profit_margin: Option<f64>,
}

/// The record flowing through the analysis pipeline. Base identity fields
/// come from the collector; each stage fills its own annotation group.
/// Stages after a batch-level fault must tolerate absent annotations, so
/// every group is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub provider_slug: String,
    pub provider_id: Option<i32>,
    pub external_code: String,
    pub name: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub raw_price: PriceValue,
    pub currency_code: String,
    pub in_stock: bool,
    pub stock_quantity: Option<i32>,
    pub product_url: Option<String>,
    pub colors: Vec<String>,
    pub sizes: Vec<String>,
    pub collected_at: DateTime<Utc>,

    pub normalized: Option<NormalizedPrice>,
    pub mapping_id: Option<i32>,
    pub existing_product_id: Option<i32>,
    pub product_id: Option<i32>,
    /// Id of the history row this batch wrote for the record; the trend
    /// window excludes it so a batch never compares a price to itself.
    pub price_history_id: Option<i32>,
    pub trend: Option<TrendMetrics>,
    pub margin: Option<MarginMetrics>,
    pub weighting: Option<WeightMetrics>,
}

impl PipelineRecord {
    /// Lifts a collector record into the pipeline shape. The provider id is
    /// resolved by the batch driver from the provider registry before the
    /// pipeline runs.
    pub fn from_unified(record: UnifiedRecord, provider_id: Option<i32>) -> Self {
        Self {
            provider_slug: record.provider_slug,
            provider_id,
            external_code: record.external_code,
            name: record.name,
            brand: record.brand,
            category: record.category,
            raw_price: record.price,
            currency_code: record.currency_code,
            in_stock: record.in_stock,
            stock_quantity: record.stock_quantity,
            product_url: record.product_url,
            colors: record.colors,
            sizes: record.sizes,
            collected_at: record.collected_at,
            normalized: None,
            mapping_id: None,
            existing_product_id: None,
            product_id: None,
            price_history_id: None,
            trend: None,
            margin: None,
            weighting: None,
        }
    }

    /// Converted price, if the record survived normalization.
    pub fn price(&self) -> Option<Decimal> {
        self.normalized.as_ref().map(|n| n.price)
    }
}
