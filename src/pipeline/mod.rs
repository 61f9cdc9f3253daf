//! Batch analysis pipeline: a typed context flowing through an ordered list
//! of stages inside a single Unit of Work.
//!
//! Stage contract: no error ever crosses the stage boundary. Per-item
//! failures append to `errors` and drop (or pass through) the affected
//! record; batch-level faults append to `hard_errors`, which is the
//! caller's rollback criterion. `skip_remaining` halts the remaining
//! stages for this batch.
//!
//! Documented `meta` keys: total_products, normalized_count,
//! normalize_errors, mappings_processed, mapping_errors,
//! products_matched_existing, products_created, variants_created,
//! saved_price_records, price_save_errors, trend_analyzed_count,
//! trend_analysis_errors, arbitrage_opportunities, profit_margin_errors,
//! reliability_weighted_count, reliability_weighting_errors,
//! trending_updated.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::Settings;
use crate::currency::CurrencyService;
use crate::db::UnitOfWork;
use crate::models::PipelineRecord;

pub mod stages;

use stages::{
    MatchProductStage, NormalizeCurrencyStage, ProfitMarginStage, ReliabilityWeightingStage,
    ResolveMappingStage, SavePriceHistoryStage, TrendAnalysisStage, UpdateTrendingStage,
};

/// Mutable envelope flowing through the stages.
#[derive(Debug, Default)]
pub struct PipelineContext {
    /// Current payload; each stage sees the previous stage's output.
    pub data: Vec<PipelineRecord>,
    /// Final artifact, set by the runner after the last stage.
    pub result: Vec<PipelineRecord>,
    /// Per-item diagnostics. Non-empty does not by itself abort the batch.
    pub errors: Vec<String>,
    /// Batch-level faults; the batch driver commits iff this stays empty.
    pub hard_errors: Vec<String>,
    /// Per-stage statistics, documented keys only.
    pub meta: HashMap<String, Value>,
    /// Stages may set this to halt the remaining stages.
    pub skip_remaining: bool,
    /// Caller identity; unused by the analysis pipeline.
    pub user: Option<String>,
}

impl PipelineContext {
    pub fn new(data: Vec<PipelineRecord>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.hard_errors.is_empty()
    }

    pub fn set_count(&mut self, key: &str, count: usize) {
        self.meta.insert(key.to_string(), Value::from(count as u64));
    }

    pub fn count(&self, key: &str) -> u64 {
        self.meta.get(key).and_then(Value::as_u64).unwrap_or(0)
    }
}

/// One unit of work over the context. Implementations catch their own
/// failures; `process` does not return a result by design.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, ctx: &mut PipelineContext, uow: &mut UnitOfWork);
}

/// Ordered stage list. Runs every stage in declaration order, breaking on
/// `skip_remaining`; accumulated `errors` never auto-break.
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn add_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn execute(
        &self,
        records: Vec<PipelineRecord>,
        uow: &mut UnitOfWork,
    ) -> PipelineContext {
        let mut ctx = PipelineContext::new(records);

        for stage in &self.stages {
            if ctx.skip_remaining {
                debug!(stage = stage.name(), "skipping remaining stages");
                break;
            }
            debug!(stage = stage.name(), records = ctx.data.len(), "running stage");
            stage.process(&mut ctx, uow).await;
        }

        ctx.result = ctx.data.clone();
        ctx
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Assembles the product-analysis pipeline in its fixed stage order.
pub fn analysis_pipeline(currency: Arc<CurrencyService>, settings: &Settings) -> Pipeline {
    Pipeline::new()
        .add_stage(Box::new(NormalizeCurrencyStage::new(currency)))
        .add_stage(Box::new(ResolveMappingStage))
        .add_stage(Box::new(MatchProductStage))
        .add_stage(Box::new(SavePriceHistoryStage))
        .add_stage(Box::new(TrendAnalysisStage::new(settings.trend_history_limit)))
        .add_stage(Box::new(ProfitMarginStage::new(
            settings.arbitrage_threshold_percent,
        )))
        .add_stage(Box::new(ReliabilityWeightingStage))
        .add_stage(Box::new(UpdateTrendingStage::new(settings.trending_top_n)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_counts_round_trip() {
        let mut ctx = PipelineContext::new(Vec::new());
        ctx.set_count("normalized_count", 7);
        assert_eq!(ctx.count("normalized_count"), 7);
        assert_eq!(ctx.count("missing"), 0);
    }

    #[test]
    fn validity_considers_both_error_lists() {
        let mut ctx = PipelineContext::new(Vec::new());
        assert!(ctx.is_valid());
        ctx.errors.push("soft".to_string());
        assert!(!ctx.is_valid());

        let mut ctx = PipelineContext::new(Vec::new());
        ctx.hard_errors.push("hard".to_string());
        assert!(!ctx.is_valid());
    }
}
