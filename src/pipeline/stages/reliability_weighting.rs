//! Reliability weighting: attenuates the derived metrics by each provider's
//! trust scores from the registry.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;

use crate::db::UnitOfWork;
use crate::models::WeightMetrics;
use crate::pipeline::{PipelineContext, Stage};

/// Scores assumed for providers missing from the registry.
const DEFAULT_RELIABILITY: f64 = 1.0;
const DEFAULT_DATA_QUALITY: i32 = 50;

pub struct ReliabilityWeightingStage;

#[async_trait]
impl Stage for ReliabilityWeightingStage {
    fn name(&self) -> &'static str {
        "reliability_weighting"
    }

    async fn process(&self, ctx: &mut PipelineContext, uow: &mut UnitOfWork) {
        if ctx.data.is_empty() {
            return;
        }

        // One pass over the distinct provider ids in the batch.
        let provider_ids: HashSet<i32> = ctx.data.iter().filter_map(|r| r.provider_id).collect();
        let mut scores: HashMap<i32, (f64, i32)> = HashMap::new();
        let mut errors: Vec<String> = Vec::new();

        for provider_id in provider_ids {
            match uow.providers().get(provider_id).await {
                Ok(Some(provider)) => {
                    scores.insert(
                        provider_id,
                        (
                            provider
                                .reliability_score
                                .to_f64()
                                .unwrap_or(DEFAULT_RELIABILITY),
                            provider.data_quality_score.unwrap_or(DEFAULT_DATA_QUALITY),
                        ),
                    );
                }
                Ok(None) => {
                    scores.insert(provider_id, (DEFAULT_RELIABILITY, DEFAULT_DATA_QUALITY));
                }
                Err(e) => {
                    errors.push(format!("Provider {}: weighting error: {}", provider_id, e));
                    scores.insert(provider_id, (DEFAULT_RELIABILITY, DEFAULT_DATA_QUALITY));
                }
            }
        }

        let mut weighted = 0usize;
        let mut records = std::mem::take(&mut ctx.data);
        for record in records.iter_mut() {
            let Some(provider_id) = record.provider_id else {
                continue;
            };
            let (reliability, quality) = scores
                .get(&provider_id)
                .copied()
                .unwrap_or((DEFAULT_RELIABILITY, DEFAULT_DATA_QUALITY));

            let trend_score = record.trend.as_ref().map(|t| t.trend_score).unwrap_or(0);
            let margin = record.margin.as_ref().map(|m| m.profit_margin_percent);

            record.weighting = Some(compute_weighting(trend_score, margin, reliability, quality));
            weighted += 1;
        }

        ctx.set_count("reliability_weighted_count", weighted);
        ctx.set_count("reliability_weighting_errors", errors.len());
        ctx.data = records;
        ctx.errors.extend(errors);
    }
}

/// Weighting for one record: confidence combines reliability with data
/// quality; the derived scores scale by reliability alone.
pub fn compute_weighting(
    trend_score: i32,
    profit_margin_percent: Option<f64>,
    reliability: f64,
    data_quality: i32,
) -> WeightMetrics {
    let confidence = (reliability + data_quality as f64 / 100.0) / 2.0;

    WeightMetrics {
        reliability_score: round2(reliability),
        data_quality_score: data_quality,
        confidence_level: round2(confidence),
        weighted_trend_score: round2(trend_score as f64 * reliability),
        weighted_profit_margin: profit_margin_percent.map(|margin| round2(margin * reliability)),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
