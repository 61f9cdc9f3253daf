//! Provider response adapters. Each external provider speaks its own JSON
//! dialect (root key, field names, default currency); an adapter turns one
//! response body into uniform records. Malformed items are skipped with a
//! warning and never abort the batch.

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::models::{PriceValue, UnifiedRecord};

pub mod alpine_gear;
pub mod dag_spor;
pub mod outdoor_pro;
pub mod sport_direct;

pub use alpine_gear::AlpineGearAdapter;
pub use dag_spor::DagSporAdapter;
pub use outdoor_pro::OutdoorProAdapter;
pub use sport_direct::SportDirectAdapter;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("invalid field '{0}'")]
    InvalidField(&'static str),
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
}

/// Adapts one provider's bespoke response shape into uniform records.
pub trait ProviderAdapter: Send + Sync + std::fmt::Debug {
    /// Provider slug used in URLs, cache keys and the providers table.
    fn provider_slug(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// Currency assumed when an item does not carry one.
    fn default_currency(&self) -> &'static str;

    /// Root key holding the items array.
    fn items_key(&self) -> &'static str;

    fn adapt_item(&self, item: &Value) -> Result<UnifiedRecord, AdapterError>;

    /// Parses a full response body, skipping malformed items.
    fn adapt(&self, response: &Value) -> Vec<UnifiedRecord> {
        let items = match response.get(self.items_key()).and_then(Value::as_array) {
            Some(items) => items,
            None => {
                warn!(
                    provider = self.provider_slug(),
                    key = self.items_key(),
                    "response is missing the items array"
                );
                return Vec::new();
            }
        };

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            match self.adapt_item(item) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    provider = self.provider_slug(),
                    error = %e,
                    "skipping malformed item"
                ),
            }
        }
        records
    }
}

static SPORT_DIRECT: SportDirectAdapter = SportDirectAdapter;
static OUTDOOR_PRO: OutdoorProAdapter = OutdoorProAdapter;
static DAG_SPOR: DagSporAdapter = DagSporAdapter;
static ALPINE_GEAR: AlpineGearAdapter = AlpineGearAdapter;

/// All registered adapters, in collection order.
pub static ADAPTERS: [&dyn ProviderAdapter; 4] =
    [&SPORT_DIRECT, &OUTDOOR_PRO, &DAG_SPOR, &ALPINE_GEAR];

/// Registered provider slugs.
pub fn all_slugs() -> Vec<&'static str> {
    ADAPTERS.iter().map(|a| a.provider_slug()).collect()
}

/// Looks up the adapter for a provider slug.
pub fn adapter_for(slug: &str) -> Result<&'static dyn ProviderAdapter, AdapterError> {
    ADAPTERS
        .iter()
        .find(|a| a.provider_slug() == slug)
        .copied()
        .ok_or_else(|| AdapterError::UnknownProvider(slug.to_string()))
}

// Field helpers shared by the adapter implementations.

pub(crate) fn required_str(item: &Value, key: &'static str) -> Result<String, AdapterError> {
    item.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(AdapterError::MissingField(key))
}

pub(crate) fn optional_str(item: &Value, key: &str) -> Option<String> {
    item.get(key).and_then(Value::as_str).map(str::to_string)
}

/// External codes are coerced to strings whatever the provider sends.
pub(crate) fn code_field(item: &Value, key: &'static str) -> Result<String, AdapterError> {
    match item.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(AdapterError::InvalidField(key)),
        None => Err(AdapterError::MissingField(key)),
    }
}

/// Prices arrive either as JSON numbers or formatted strings; both are
/// carried verbatim and parsed later by the normalization stage.
pub(crate) fn price_field(item: &Value, key: &'static str) -> Result<PriceValue, AdapterError> {
    match item.get(key) {
        Some(Value::Number(n)) => n
            .as_f64()
            .map(PriceValue::Number)
            .ok_or(AdapterError::InvalidField(key)),
        Some(Value::String(s)) => Ok(PriceValue::Text(s.clone())),
        Some(_) => Err(AdapterError::InvalidField(key)),
        None => Err(AdapterError::MissingField(key)),
    }
}

pub(crate) fn int_field(item: &Value, key: &str) -> Option<i32> {
    item.get(key).and_then(Value::as_i64).map(|v| v as i32)
}

pub(crate) fn bool_field(item: &Value, key: &str) -> bool {
    item.get(key).and_then(Value::as_bool).unwrap_or(false)
}

pub(crate) fn string_list(item: &Value, key: &str) -> Vec<String> {
    item.get(key)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn now_collected() -> chrono::DateTime<Utc> {
    Utc::now()
}
