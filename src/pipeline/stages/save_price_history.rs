//! Price-history persistence: one append-only row per surviving record,
//! bulk-inserted inside the batch transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use metrics::counter;
use tracing::warn;

use crate::db::models::NewPriceHistory;
use crate::db::UnitOfWork;
use crate::models::PipelineRecord;
use crate::pipeline::{PipelineContext, Stage};

pub struct SavePriceHistoryStage;

#[async_trait]
impl Stage for SavePriceHistoryStage {
    fn name(&self) -> &'static str {
        "save_price_history"
    }

    async fn process(&self, ctx: &mut PipelineContext, uow: &mut UnitOfWork) {
        if ctx.data.is_empty() {
            return;
        }

        // One-shot preload; every record in the batch carries the base
        // currency after normalization.
        let currency_ids = match uow.currencies().code_to_id().await {
            Ok(map) => map,
            Err(e) => {
                let message = format!("currency preload failed: {}", e);
                warn!(error = %e, "price history stage aborted");
                ctx.errors.push(message.clone());
                ctx.hard_errors.push(message);
                return;
            }
        };

        let (indexed_rows, errors) = build_price_records(&ctx.data, &currency_ids);
        let record_errors = errors.len();
        ctx.errors.extend(errors);

        let mut saved = 0usize;
        if !indexed_rows.is_empty() {
            let rows: Vec<NewPriceHistory> =
                indexed_rows.iter().map(|(_, row)| row.clone()).collect();
            match uow.price_histories().insert_bulk(&rows).await {
                Ok(ids) => {
                    saved = ids.len();
                    counter!("pipeline_price_records_saved", saved as u64);
                    // Remember each record's own row so the trend window can
                    // exclude it.
                    for ((index, _), id) in indexed_rows.iter().zip(ids) {
                        ctx.data[*index].price_history_id = Some(id);
                    }
                }
                Err(e) => {
                    // Batch-level fault: downstream stages keep running on
                    // the same data, the caller rolls back.
                    let message = format!("price history bulk insert failed: {}", e);
                    warn!(error = %e, "bulk insert failed");
                    ctx.errors.push(message.clone());
                    ctx.hard_errors.push(message);
                }
            }
        }

        ctx.set_count("saved_price_records", saved);
        ctx.set_count("price_save_errors", record_errors);
    }
}

/// Builds the insert DTOs for every record that has a mapping and a
/// normalized price, keyed by record index. Skipped records become errors;
/// the record itself stays in the stream for the analysis stages.
pub fn build_price_records(
    records: &[PipelineRecord],
    currency_ids: &HashMap<String, i32>,
) -> (Vec<(usize, NewPriceHistory)>, Vec<String>) {
    let mut rows = Vec::with_capacity(records.len());
    let mut errors = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let Some(mapping_id) = record.mapping_id else {
            errors.push(format!(
                "ID {}: mapping_id missing, price not recorded",
                record.external_code
            ));
            continue;
        };

        let Some(normalized) = record.normalized.as_ref() else {
            errors.push(format!("Mapping {}: price missing", mapping_id));
            continue;
        };

        if normalized.price <= rust_decimal::Decimal::ZERO {
            errors.push(format!(
                "Mapping {}: non-positive price {}",
                mapping_id, normalized.price
            ));
            continue;
        }

        let currency = normalized.currency.to_uppercase();
        let Some(&currency_id) = currency_ids.get(&currency) else {
            errors.push(format!(
                "Mapping {}: currency '{}' not registered",
                mapping_id, currency
            ));
            continue;
        };

        rows.push((
            index,
            NewPriceHistory {
                mapping_id,
                price: normalized.price,
                original_price: Some(normalized.original_price),
                discount_rate: None,
                currency_id,
                in_stock: record.in_stock,
                stock_quantity: record.stock_quantity,
            },
        ));
    }

    (rows, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NormalizedPrice, PriceValue};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn record(mapping_id: Option<i32>, normalized: bool) -> PipelineRecord {
        PipelineRecord {
            provider_slug: "sport-direct".to_string(),
            provider_id: Some(1),
            external_code: "9".to_string(),
            name: "Nike Air".to_string(),
            brand: None,
            category: None,
            raw_price: PriceValue::Number(100.0),
            currency_code: "USD".to_string(),
            in_stock: true,
            stock_quantity: Some(4),
            product_url: None,
            colors: Vec::new(),
            sizes: Vec::new(),
            collected_at: Utc::now(),
            normalized: normalized.then(|| NormalizedPrice {
                original_price: dec!(100.00),
                original_currency: "USD".to_string(),
                price: dec!(3420.00),
                currency: "TRY".to_string(),
            }),
            mapping_id,
            existing_product_id: None,
            product_id: None,
            price_history_id: None,
            trend: None,
            margin: None,
            weighting: None,
        }
    }

    fn currency_ids() -> HashMap<String, i32> {
        HashMap::from([("TRY".to_string(), 1)])
    }

    #[test]
    fn builds_rows_for_complete_records() {
        let records = vec![record(Some(5), true)];
        let (rows, errors) = build_price_records(&records, &currency_ids());

        assert!(errors.is_empty());
        assert_eq!(rows.len(), 1);
        let (index, row) = &rows[0];
        assert_eq!(*index, 0);
        assert_eq!(row.mapping_id, 5);
        assert_eq!(row.price, dec!(3420.00));
        assert_eq!(row.original_price, Some(dec!(100.00)));
        assert_eq!(row.currency_id, 1);
        assert!(row.in_stock);
        assert_eq!(row.stock_quantity, Some(4));
    }

    #[test]
    fn indices_track_the_source_records() {
        let records = vec![record(None, true), record(Some(5), true)];
        let (rows, errors) = build_price_records(&records, &currency_ids());
        assert_eq!(errors.len(), 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, 1);
    }

    #[test]
    fn missing_mapping_is_an_error() {
        let (rows, errors) = build_price_records(&[record(None, true)], &currency_ids());
        assert!(rows.is_empty());
        assert!(errors[0].contains("mapping_id missing"));
    }

    #[test]
    fn missing_normalized_price_is_an_error() {
        let (rows, errors) = build_price_records(&[record(Some(5), false)], &currency_ids());
        assert!(rows.is_empty());
        assert!(errors[0].contains("price missing"));
    }

    #[test]
    fn unknown_currency_is_an_error() {
        let (rows, errors) = build_price_records(&[record(Some(5), true)], &HashMap::new());
        assert!(rows.is_empty());
        assert!(errors[0].contains("not registered"));
    }

    #[test]
    fn non_positive_price_is_an_error() {
        let mut bad = record(Some(5), true);
        if let Some(normalized) = bad.normalized.as_mut() {
            normalized.price = dec!(0.00);
        }
        let (rows, errors) = build_price_records(&[bad], &currency_ids());
        assert!(rows.is_empty());
        assert!(errors[0].contains("non-positive price"));
    }
}
