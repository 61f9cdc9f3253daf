//! Trend analysis: scores each record's price movement against its recent
//! history window.
//!
//! Score model: base = clamp(change% · 5, ±100) where change% compares the
//! current price to the window average; a monotonic newest-three run adds
//! ±10 momentum; the sum is clamped to [-100, +100].

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;

use crate::db::UnitOfWork;
use crate::models::{TrendDirection, TrendMetrics};
use crate::pipeline::{PipelineContext, Stage};

/// ±2% around the window average still counts as stable.
const STABLE_THRESHOLD_PERCENT: f64 = 2.0;
const MOMENTUM_BONUS: f64 = 10.0;

pub struct TrendAnalysisStage {
    history_limit: i64,
}

impl TrendAnalysisStage {
    pub fn new(history_limit: i64) -> Self {
        Self { history_limit }
    }
}

#[async_trait]
impl Stage for TrendAnalysisStage {
    fn name(&self) -> &'static str {
        "trend_analysis"
    }

    async fn process(&self, ctx: &mut PipelineContext, uow: &mut UnitOfWork) {
        if ctx.data.is_empty() {
            return;
        }

        let mut analyzed = 0usize;
        let mut errors: Vec<String> = Vec::new();

        let mut records = std::mem::take(&mut ctx.data);
        for record in records.iter_mut() {
            let (Some(mapping_id), Some(price)) = (record.mapping_id, record.price()) else {
                // Not analyzable; the record passes through untouched.
                continue;
            };
            let current = price.to_f64().unwrap_or_default();

            match uow
                .price_histories()
                .recent_for_mapping(mapping_id, record.price_history_id, self.history_limit)
                .await
            {
                Ok(history) => {
                    let prices: Vec<f64> = history
                        .iter()
                        .map(|row| row.price.to_f64().unwrap_or_default())
                        .collect();
                    record.trend = Some(analyze_trend(current, &prices));
                    analyzed += 1;
                }
                Err(e) => {
                    errors.push(format!("Mapping {}: trend analysis error: {}", mapping_id, e));
                }
            }
        }

        ctx.set_count("trend_analyzed_count", analyzed);
        ctx.set_count("trend_analysis_errors", errors.len());
        ctx.data = records;
        ctx.errors.extend(errors);
    }
}

/// Computes trend metrics from the current price and a newest-first history
/// window. Fewer than two samples yield the neutral result.
pub fn analyze_trend(current_price: f64, prices_newest_first: &[f64]) -> TrendMetrics {
    if prices_newest_first.len() < 2 {
        return TrendMetrics {
            trend_score: 0,
            trend_direction: TrendDirection::Stable,
            price_change_percent: 0.0,
            avg_price: current_price,
            min_price: current_price,
            max_price: current_price,
            has_sufficient_data: false,
        };
    }

    let avg = prices_newest_first.iter().sum::<f64>() / prices_newest_first.len() as f64;
    let min = prices_newest_first.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = prices_newest_first
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);

    let change_percent = if avg > 0.0 {
        (current_price - avg) / avg * 100.0
    } else {
        0.0
    };

    let direction = if change_percent.abs() <= STABLE_THRESHOLD_PERCENT {
        TrendDirection::Stable
    } else if change_percent > 0.0 {
        TrendDirection::Up
    } else {
        TrendDirection::Down
    };

    let base_score = (change_percent * 5.0).clamp(-100.0, 100.0);
    let score = (base_score + momentum(prices_newest_first)).clamp(-100.0, 100.0);

    TrendMetrics {
        trend_score: score as i32,
        trend_direction: direction,
        price_change_percent: round2(change_percent),
        avg_price: round2(avg),
        min_price: round2(min),
        max_price: round2(max),
        has_sufficient_data: true,
    }
}

/// ±10 when the three newest samples move monotonically in time order.
/// The window is newest-first, so descending values mean prices were
/// rising toward now.
fn momentum(prices_newest_first: &[f64]) -> f64 {
    if prices_newest_first.len() < 3 {
        return 0.0;
    }
    let recent = &prices_newest_first[..3];
    if recent.windows(2).all(|pair| pair[0] <= pair[1]) {
        -MOMENTUM_BONUS
    } else if recent.windows(2).all(|pair| pair[0] >= pair[1]) {
        MOMENTUM_BONUS
    } else {
        0.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
