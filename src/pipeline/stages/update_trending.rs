//! Trending refresh: fully replaces the trending table with the batch's
//! strongest movers, ranked by absolute trend score.

use async_trait::async_trait;
use tracing::warn;

use crate::db::UnitOfWork;
use crate::models::PipelineRecord;
use crate::pipeline::{PipelineContext, Stage};

pub struct UpdateTrendingStage {
    top_n: usize,
}

impl UpdateTrendingStage {
    pub fn new(top_n: usize) -> Self {
        Self { top_n }
    }
}

#[async_trait]
impl Stage for UpdateTrendingStage {
    fn name(&self) -> &'static str {
        "update_trending"
    }

    async fn process(&self, ctx: &mut PipelineContext, uow: &mut UnitOfWork) {
        if ctx.data.is_empty() {
            return;
        }

        let entries = select_trending(&ctx.data, self.top_n);
        if entries.is_empty() {
            ctx.set_count("trending_updated", 0);
            return;
        }

        match uow.trending_products().replace_all(&entries).await {
            Ok(count) => ctx.set_count("trending_updated", count),
            Err(e) => {
                // Delete-and-insert is all-or-nothing; a failure here is a
                // batch-level fault.
                let message = format!("trending refresh failed: {}", e);
                warn!(error = %e, "trending refresh failed");
                ctx.errors.push(message.clone());
                ctx.hard_errors.push(message);
                ctx.set_count("trending_updated", 0);
            }
        }
    }
}

/// Picks the top-N `(product_id, trend_score)` pairs by absolute score.
/// Rising and falling prices are both "trending". Only records that carry
/// both a product and a trend qualify.
pub fn select_trending(records: &[PipelineRecord], top_n: usize) -> Vec<(i32, i32)> {
    let mut scored: Vec<(i32, i32)> = records
        .iter()
        .filter_map(|record| {
            let product_id = record.product_id?;
            let trend = record.trend.as_ref()?;
            Some((product_id, trend.trend_score))
        })
        .collect();

    scored.sort_by(|a, b| b.1.abs().cmp(&a.1.abs()));
    scored.truncate(top_n);
    scored
}
