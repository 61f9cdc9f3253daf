//! Batch driver: one pass = collect all providers, flatten the successful
//! records, run the analysis pipeline inside a Unit of Work, then commit or
//! roll back. A periodic loop repeats the pass until cancelled.
//!
//! Commit rule: per-item errors never force a rollback; any batch-level
//! fault (`hard_errors`) does.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::collector::CollectorStats;
use crate::db::{DbError, UnitOfWork};
use crate::models::PipelineRecord;
use crate::Services;

/// Cache list holding the most recent batch reports, newest first.
pub const BATCH_REPORTS_CACHE_KEY: &str = "collector:batch_reports";
const BATCH_REPORTS_KEPT: isize = 20;
const BATCH_REPORTS_LAST_INDEX: isize = BATCH_REPORTS_KEPT - 1;

/// Outcome of one scheduled or on-demand batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub committed: bool,
    pub collected_products: usize,
    pub collector_stats: CollectorStats,
    pub stage_meta: HashMap<String, Value>,
    pub errors: Vec<String>,
    pub hard_errors: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

/// Runs one full collection + analysis batch.
#[instrument(skip(services, token))]
pub async fn run_batch(
    services: &Services,
    token: &CancellationToken,
) -> Result<BatchReport, DbError> {
    let collection = services.collector.collect_all(None, token).await;
    let records = collection.all_records();

    if records.is_empty() {
        warn!("no records collected, skipping analysis");
        let report = BatchReport {
            batch_id: collection.batch_id,
            committed: false,
            collected_products: 0,
            collector_stats: collection.stats.clone(),
            stage_meta: HashMap::new(),
            errors: Vec::new(),
            hard_errors: Vec::new(),
            finished_at: Utc::now(),
        };
        journal_report(services, &report).await;
        return Ok(report);
    }

    let mut uow = UnitOfWork::begin(&services.pool).await?;

    let providers = match uow.providers().by_slug().await {
        Ok(map) => map,
        Err(e) => {
            // Without provider identities nothing downstream can persist.
            let _ = uow.rollback().await;
            return Err(e);
        }
    };

    let mut pre_errors: Vec<String> = Vec::new();
    let collected_products = records.len();
    let pipeline_records: Vec<PipelineRecord> = records
        .into_iter()
        .filter_map(|record| match providers.get(&record.provider_slug) {
            Some(provider) => Some(PipelineRecord::from_unified(record, Some(provider.id))),
            None => {
                warn!(slug = %record.provider_slug, "provider not registered, record dropped");
                pre_errors.push(format!(
                    "ID {}: provider '{}' not registered",
                    record.external_code, record.provider_slug
                ));
                None
            }
        })
        .collect();

    let ctx = services.pipeline.execute(pipeline_records, &mut uow).await;

    let committed = if ctx.hard_errors.is_empty() {
        uow.commit().await?;
        counter!("pipeline_batches_committed", 1);
        true
    } else {
        error!(hard_errors = ctx.hard_errors.len(), "rolling back batch");
        uow.rollback().await?;
        counter!("pipeline_batches_rolled_back", 1);
        false
    };

    let mut errors = pre_errors;
    errors.extend(ctx.errors.iter().cloned());

    let report = BatchReport {
        batch_id: collection.batch_id,
        committed,
        collected_products,
        collector_stats: collection.stats.clone(),
        stage_meta: ctx.meta.clone(),
        errors,
        hard_errors: ctx.hard_errors.clone(),
        finished_at: Utc::now(),
    };

    info!(
        batch_id = %report.batch_id,
        committed,
        products = report.collected_products,
        saved = ctx.count("saved_price_records"),
        errors = report.errors.len(),
        "batch finished"
    );

    journal_report(services, &report).await;
    Ok(report)
}

/// Appends the report to the capped cache journal. Journal failures are
/// logged, never propagated.
async fn journal_report(services: &Services, report: &BatchReport) {
    let Ok(encoded) = serde_json::to_string(report) else {
        return;
    };
    if let Err(e) = services.cache.lpush(BATCH_REPORTS_CACHE_KEY, &encoded).await {
        warn!(error = %e, "batch report journal write failed");
        return;
    }
    if let Err(e) = services
        .cache
        .ltrim(BATCH_REPORTS_CACHE_KEY, 0, BATCH_REPORTS_LAST_INDEX)
        .await
    {
        warn!(error = %e, "batch report journal trim failed");
    }
}

/// Recent batch reports from the cache journal, newest first.
pub async fn recent_reports(services: &Services) -> Vec<BatchReport> {
    match services
        .cache
        .lrange(BATCH_REPORTS_CACHE_KEY, 0, BATCH_REPORTS_KEPT - 1)
        .await
    {
        Ok(entries) => entries
            .iter()
            .filter_map(|entry| serde_json::from_str(entry).ok())
            .collect(),
        Err(e) => {
            warn!(error = %e, "batch report journal read failed");
            Vec::new()
        }
    }
}

/// Invokes `run_batch` every `collect_interval` until the token fires.
pub async fn run_loop(services: &Services, token: CancellationToken) {
    let mut interval = tokio::time::interval(services.settings.collect_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        interval_secs = services.settings.collect_interval.as_secs(),
        "scheduler started"
    );

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("scheduler stopping");
                break;
            }
            _ = interval.tick() => {
                if let Err(e) = run_batch(services, &token).await {
                    error!(error = %e, "batch run failed");
                }
            }
        }
    }
}
