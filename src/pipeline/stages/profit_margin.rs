//! Profit-margin analysis: compares each record's price against the market
//! average from its price history and flags arbitrage opportunities.
//!
//! A positive margin means this provider undercuts the market average.
//! The arbitrage flag fires on the reliability-weighted margin, so noisy
//! sources need a larger raw edge to qualify.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;

use crate::db::UnitOfWork;
use crate::models::MarginMetrics;
use crate::pipeline::{PipelineContext, Stage};

/// Reliability assumed for providers absent from the registry.
const DEFAULT_RELIABILITY_WEIGHT: f64 = 0.80;
/// Price points considered when the trend stage left no average behind.
const MARKET_HISTORY_LIMIT: i64 = 50;

pub struct ProfitMarginStage {
    arbitrage_threshold_percent: f64,
}

impl ProfitMarginStage {
    pub fn new(arbitrage_threshold_percent: f64) -> Self {
        Self {
            arbitrage_threshold_percent,
        }
    }
}

#[async_trait]
impl Stage for ProfitMarginStage {
    fn name(&self) -> &'static str {
        "profit_margin"
    }

    async fn process(&self, ctx: &mut PipelineContext, uow: &mut UnitOfWork) {
        if ctx.data.is_empty() {
            return;
        }

        let mut reliability_cache: HashMap<i32, f64> = HashMap::new();
        let mut arbitrage_count = 0usize;
        let mut errors: Vec<String> = Vec::new();

        let mut records = std::mem::take(&mut ctx.data);
        for record in records.iter_mut() {
            let Some(price) = record.price() else {
                continue;
            };
            let current = price.to_f64().unwrap_or_default();

            let reliability = match record.provider_id {
                Some(provider_id) => {
                    if let Some(cached) = reliability_cache.get(&provider_id).copied() {
                        cached
                    } else {
                        let loaded = match uow.providers().get(provider_id).await {
                            Ok(Some(provider)) => provider
                                .reliability_score
                                .to_f64()
                                .unwrap_or(DEFAULT_RELIABILITY_WEIGHT),
                            Ok(None) => DEFAULT_RELIABILITY_WEIGHT,
                            Err(e) => {
                                errors.push(format!(
                                    "Provider {}: reliability lookup error: {}",
                                    provider_id, e
                                ));
                                DEFAULT_RELIABILITY_WEIGHT
                            }
                        };
                        reliability_cache.insert(provider_id, loaded);
                        loaded
                    }
                }
                None => DEFAULT_RELIABILITY_WEIGHT,
            };

            // Prefer the average the trend stage already computed; fall back
            // to a fresh history read.
            let market_avg = match record.trend.as_ref() {
                Some(trend) => Some(trend.avg_price),
                None => match record.mapping_id {
                    Some(mapping_id) => {
                        match uow
                            .price_histories()
                            .recent_for_mapping(
                                mapping_id,
                                record.price_history_id,
                                MARKET_HISTORY_LIMIT,
                            )
                            .await
                        {
                            Ok(history) if !history.is_empty() => {
                                let prices: Vec<f64> = history
                                    .iter()
                                    .map(|row| row.price.to_f64().unwrap_or_default())
                                    .collect();
                                Some(prices.iter().sum::<f64>() / prices.len() as f64)
                            }
                            Ok(_) => None,
                            Err(e) => {
                                errors.push(format!(
                                    "Mapping {}: market average error: {}",
                                    mapping_id, e
                                ));
                                None
                            }
                        }
                    }
                    None => None,
                },
            };

            let metrics = compute_margin(
                current,
                market_avg,
                reliability,
                self.arbitrage_threshold_percent,
            );
            if metrics.is_arbitrage_opportunity {
                arbitrage_count += 1;
            }
            record.margin = Some(metrics);
        }

        ctx.set_count("arbitrage_opportunities", arbitrage_count);
        ctx.set_count("profit_margin_errors", errors.len());
        ctx.data = records;
        ctx.errors.extend(errors);
    }
}

/// Margin metrics for one observation. No market data yields the inert
/// result rather than an error.
pub fn compute_margin(
    price: f64,
    market_avg: Option<f64>,
    reliability: f64,
    arbitrage_threshold_percent: f64,
) -> MarginMetrics {
    let Some(market_avg) = market_avg.filter(|avg| *avg > 0.0) else {
        return MarginMetrics {
            market_avg_price: 0.0,
            profit_margin_percent: 0.0,
            weighted_profit_margin: 0.0,
            is_arbitrage_opportunity: false,
            has_market_data: false,
        };
    };

    let margin_percent = (market_avg - price) / market_avg * 100.0;
    let weighted_margin = margin_percent * reliability;

    MarginMetrics {
        market_avg_price: round2(market_avg),
        profit_margin_percent: round2(margin_percent),
        weighted_profit_margin: round2(weighted_margin),
        is_arbitrage_opportunity: weighted_margin >= arbitrage_threshold_percent,
        has_market_data: true,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
