//! Currency normalization: parses raw provider prices and converts them to
//! the base currency. Rates are fetched once per batch.
//!
//! Price-format rule: the relative positions of the last `.` and `,` decide
//! US (`1,234.56`) vs European (`1.234,56`) formatting. A bare `,` is always
//! a decimal separator. A bare `.` is a thousands separator only when
//! followed by exactly three digits (`1.000` → 1000); any other tail is
//! decimal (`23.5` → 23.5, `1.2345` → 1.2345).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::currency::CurrencyService;
use crate::db::UnitOfWork;
use crate::models::{NormalizedPrice, PipelineRecord, PriceValue};
use crate::pipeline::{PipelineContext, Stage};

pub struct NormalizeCurrencyStage {
    currency: Arc<CurrencyService>,
}

impl NormalizeCurrencyStage {
    pub fn new(currency: Arc<CurrencyService>) -> Self {
        Self { currency }
    }
}

#[async_trait]
impl Stage for NormalizeCurrencyStage {
    fn name(&self) -> &'static str {
        "normalize_currency"
    }

    async fn process(&self, ctx: &mut PipelineContext, _uow: &mut UnitOfWork) {
        if ctx.data.is_empty() {
            ctx.errors.push("empty product batch".to_string());
            return;
        }

        let rates = self.currency.get_exchange_rates().await;
        let base = self.currency.base_currency();
        let total = ctx.data.len();

        let records = std::mem::take(&mut ctx.data);
        let (normalized, errors) = normalize_batch(records, &rates, base);

        debug!(
            total,
            normalized = normalized.len(),
            errors = errors.len(),
            "currency normalization finished"
        );

        ctx.set_count("total_products", total);
        ctx.set_count("normalized_count", normalized.len());
        ctx.set_count("normalize_errors", errors.len());
        ctx.data = normalized;
        ctx.errors.extend(errors);
    }
}

/// Normalizes every record against the rate table. Failed records are
/// dropped from the forward stream and reported as errors.
pub fn normalize_batch(
    records: Vec<PipelineRecord>,
    rates: &HashMap<String, f64>,
    base_currency: &str,
) -> (Vec<PipelineRecord>, Vec<String>) {
    let mut normalized = Vec::with_capacity(records.len());
    let mut errors = Vec::new();

    for mut record in records {
        let parsed = match parse_price(&record.raw_price) {
            Ok(price) => price,
            Err(e) => {
                errors.push(format!(
                    "ID {}: price parse failed ({})",
                    record.external_code, e
                ));
                continue;
            }
        };

        let currency = record.currency_code.to_uppercase();
        let converted = if currency == base_currency {
            parsed
        } else {
            match rates.get(&currency).and_then(|n: &f64| Decimal::from_f64(*n)) {
                Some(rate) => (parsed * rate)
                    .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
                None => {
                    errors.push(format!(
                        "ID {}: no exchange rate for {}",
                        record.external_code, currency
                    ));
                    continue;
                }
            }
        };

        record.normalized = Some(NormalizedPrice {
            original_price: parsed,
            original_currency: record.currency_code.clone(),
            price: converted,
            currency: base_currency.to_string(),
        });
        normalized.push(record);
    }

    (normalized, errors)
}

/// Parses a raw provider price into a decimal. See the module docs for the
/// separator rules.
pub fn parse_price(raw: &PriceValue) -> Result<Decimal, String> {
    let text = match raw {
        PriceValue::Number(n) => {
            return Decimal::from_f64(*n).ok_or_else(|| format!("invalid numeric price {}", n))
        }
        PriceValue::Text(s) => s,
    };

    let cleaned: String = text
        .replace(['$', '€', '£', '₺'], "")
        .replace("TL", "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return Err(format!("empty price '{}'", text));
    }

    let dot_pos = cleaned.rfind('.');
    let comma_pos = cleaned.rfind(',');

    let plain = match (dot_pos, comma_pos) {
        (Some(dot), Some(comma)) if dot > comma => {
            // US format: comma is a thousands separator.
            cleaned.replace(',', "")
        }
        (Some(_), Some(_)) => {
            // European format: dot separates thousands, comma decimals.
            cleaned.replace('.', "").replace(',', ".")
        }
        (None, Some(_)) => {
            // A bare comma is a decimal separator.
            cleaned.replace(',', ".")
        }
        (Some(dot), None) => {
            let dots = cleaned.matches('.').count();
            let tail = &cleaned[dot + 1..];
            if dots > 1 || (tail.len() == 3 && tail.chars().all(|c| c.is_ascii_digit()) && dot > 0)
            {
                cleaned.replace('.', "")
            } else {
                cleaned
            }
        }
        (None, None) => cleaned,
    };

    plain
        .parse::<Decimal>()
        .map_err(|_| format!("could not parse price '{}'", text))
}
