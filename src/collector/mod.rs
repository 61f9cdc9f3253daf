//! Catalog collector: parallel fan-out over all registered providers with
//! per-provider caching, resilient fetching and response adaptation.
//!
//! Provider failures are fully isolated; a sibling failing never cancels the
//! others. An open circuit counts as "skipped", not "failed".
//!
//! Version dependencies:
//! - tokio = "1.28"
//! - futures = "0.3"
//! - dashmap = "5.5"

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::Cache;
use crate::config::Settings;
use crate::models::UnifiedRecord;
use crate::resilience::{
    CircuitBreakerRegistry, CircuitSnapshot, ClientError, HttpClientConfig, ResilientClient,
    RetryStrategy,
};

pub mod adapters;

use adapters::{adapter_for, all_slugs};

/// Outcome of collecting one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderResult {
    pub provider_slug: String,
    pub success: bool,
    /// True when the circuit breaker refused the call or the run was
    /// cancelled; not counted as a failure in the aggregate.
    pub skipped: bool,
    pub from_cache: bool,
    #[serde(skip)]
    pub records: Vec<UnifiedRecord>,
    pub error_message: Option<String>,
    pub response_time_ms: u64,
    pub fetched_at: DateTime<Utc>,
}

impl ProviderResult {
    pub fn product_count(&self) -> usize {
        self.records.len()
    }

    fn failure(slug: &str, message: String, elapsed_ms: u64) -> Self {
        Self {
            provider_slug: slug.to_string(),
            success: false,
            skipped: false,
            from_cache: false,
            records: Vec::new(),
            error_message: Some(message),
            response_time_ms: elapsed_ms,
            fetched_at: Utc::now(),
        }
    }

    fn skipped(slug: &str, message: String, elapsed_ms: u64) -> Self {
        Self {
            skipped: true,
            ..Self::failure(slug, message, elapsed_ms)
        }
    }
}

/// Aggregate statistics over one collection pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorStats {
    pub total_providers: usize,
    pub successful_providers: usize,
    pub failed_providers: usize,
    pub skipped_providers: usize,
    pub total_products: usize,
    pub total_time_ms: u64,
}

impl CollectorStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_providers == 0 {
            return 0.0;
        }
        self.successful_providers as f64 / self.total_providers as f64 * 100.0
    }
}

/// Full report of one collection pass, including the breaker observability
/// snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub batch_id: Uuid,
    pub results: Vec<ProviderResult>,
    pub stats: CollectorStats,
    pub circuit_snapshots: Vec<CircuitSnapshot>,
    pub collected_at: DateTime<Utc>,
}

impl CollectionReport {
    /// Records from every successful provider, in provider order.
    pub fn all_records(&self) -> Vec<UnifiedRecord> {
        self.results
            .iter()
            .filter(|r| r.success)
            .flat_map(|r| r.records.iter().cloned())
            .collect()
    }

    pub fn failed_results(&self) -> Vec<&ProviderResult> {
        self.results
            .iter()
            .filter(|r| !r.success && !r.skipped)
            .collect()
    }
}

/// Fan-out collector over the registered providers.
pub struct Collector {
    settings: Arc<Settings>,
    cache: Arc<dyn Cache>,
    breakers: Arc<CircuitBreakerRegistry>,
    clients: DashMap<String, Arc<ResilientClient>>,
}

impl Collector {
    pub fn new(
        settings: Arc<Settings>,
        cache: Arc<dyn Cache>,
        breakers: Arc<CircuitBreakerRegistry>,
    ) -> Self {
        Self {
            settings,
            cache,
            breakers,
            clients: DashMap::new(),
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    fn cache_key(slug: &str) -> String {
        format!("collector:products:{}", slug)
    }

    fn client_for(&self, slug: &str) -> Result<Arc<ResilientClient>, ClientError> {
        if let Some(client) = self.clients.get(slug) {
            return Ok(client.clone());
        }

        let breaker = self
            .breakers
            .get_or_create(slug, self.settings.breaker_config(slug));
        let config = HttpClientConfig {
            timeout: self.settings.collector_timeout,
            max_retries: self.settings.collector_max_retries,
            retry_strategy: RetryStrategy::Exponential,
            ..HttpClientConfig::default()
        };
        let client = Arc::new(ResilientClient::new(slug, config, breaker)?);
        self.clients.insert(slug.to_string(), client.clone());
        Ok(client)
    }

    /// Collects every target provider in parallel and aggregates the
    /// results. `providers = None` means all registered providers.
    #[instrument(skip(self, token))]
    pub async fn collect_all(
        &self,
        providers: Option<Vec<String>>,
        token: &CancellationToken,
    ) -> CollectionReport {
        let start = Instant::now();
        let slugs: Vec<String> = providers
            .unwrap_or_else(|| all_slugs().iter().map(|s| s.to_string()).collect());

        info!(providers = slugs.len(), "starting collection");

        let tasks = slugs.iter().map(|slug| self.fetch_provider(slug, token));
        let results: Vec<ProviderResult> = join_all(tasks).await;

        let total_time_ms = start.elapsed().as_millis() as u64;
        let successful = results.iter().filter(|r| r.success).count();
        let skipped = results.iter().filter(|r| r.skipped).count();
        let failed = results.len() - successful - skipped;
        let total_products: usize = results
            .iter()
            .filter(|r| r.success)
            .map(ProviderResult::product_count)
            .sum();

        let stats = CollectorStats {
            total_providers: results.len(),
            successful_providers: successful,
            failed_providers: failed,
            skipped_providers: skipped,
            total_products,
            total_time_ms,
        };

        counter!("collector_runs", 1);
        counter!("collector_products_collected", total_products as u64);
        histogram!("collector_run_duration_ms", total_time_ms as f64);

        info!(
            successful,
            failed,
            skipped,
            total_products,
            total_time_ms,
            "collection completed"
        );

        CollectionReport {
            batch_id: Uuid::new_v4(),
            results,
            stats,
            circuit_snapshots: self.breakers.snapshot_all(),
            collected_at: Utc::now(),
        }
    }

    /// Collects one provider; unknown slugs fail without touching the
    /// network.
    pub async fn collect_single(&self, slug: &str, token: &CancellationToken) -> ProviderResult {
        if adapter_for(slug).is_err() {
            return ProviderResult::failure(slug, format!("unknown provider: {}", slug), 0);
        }
        self.fetch_provider(slug, token).await
    }

    async fn fetch_provider(&self, slug: &str, token: &CancellationToken) -> ProviderResult {
        let start = Instant::now();
        let cache_key = Self::cache_key(slug);

        // Cache lookup never fails the provider; a broken cache read only
        // forces a refetch.
        match self.cache.get(&cache_key).await {
            Ok(Some(cached)) => {
                if let Ok(records) = serde_json::from_str::<Vec<UnifiedRecord>>(&cached) {
                    debug!(provider = slug, count = records.len(), "cache hit");
                    counter!("collector_cache_hits", 1);
                    return ProviderResult {
                        provider_slug: slug.to_string(),
                        success: true,
                        skipped: false,
                        from_cache: true,
                        records,
                        error_message: None,
                        response_time_ms: 0,
                        fetched_at: Utc::now(),
                    };
                }
                warn!(provider = slug, "cache entry is not decodable, refetching");
            }
            Ok(None) => {}
            Err(e) => warn!(provider = slug, error = %e, "cache read error"),
        }
        counter!("collector_cache_misses", 1);

        let adapter = match adapter_for(slug) {
            Ok(adapter) => adapter,
            Err(e) => {
                return ProviderResult::failure(
                    slug,
                    e.to_string(),
                    start.elapsed().as_millis() as u64,
                )
            }
        };

        let client = match self.client_for(slug) {
            Ok(client) => client,
            Err(e) => {
                return ProviderResult::failure(
                    slug,
                    e.to_string(),
                    start.elapsed().as_millis() as u64,
                )
            }
        };

        let url = self.settings.provider_url(slug);
        debug!(provider = slug, url = %url, "fetching");

        let body = match client.get(&url, token).await {
            Ok(body) => body,
            Err(e) if e.is_circuit_open() => {
                info!(provider = slug, "circuit open, provider skipped");
                return ProviderResult::skipped(
                    slug,
                    e.to_string(),
                    start.elapsed().as_millis() as u64,
                );
            }
            Err(ClientError::Cancelled) => {
                debug!(provider = slug, "collection cancelled");
                return ProviderResult::skipped(
                    slug,
                    "collection cancelled".to_string(),
                    start.elapsed().as_millis() as u64,
                );
            }
            Err(e) => {
                warn!(provider = slug, error = %e, "provider fetch failed");
                return ProviderResult::failure(
                    slug,
                    e.to_string(),
                    start.elapsed().as_millis() as u64,
                );
            }
        };

        let records = adapter.adapt(&body);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if let Ok(encoded) = serde_json::to_string(&records) {
            if let Err(e) = self
                .cache
                .set(&cache_key, &encoded, self.settings.collector_cache_ttl_secs)
                .await
            {
                warn!(provider = slug, error = %e, "cache write error");
            }
        }

        info!(
            provider = slug,
            count = records.len(),
            elapsed_ms,
            "provider collected"
        );

        ProviderResult {
            provider_slug: slug.to_string(),
            success: true,
            skipped: false,
            from_cache: false,
            records,
            error_message: None,
            response_time_ms: elapsed_ms,
            fetched_at: Utc::now(),
        }
    }

    /// Drops cached records for one provider, or for all providers.
    pub async fn invalidate_cache(&self, provider: Option<&str>) {
        let slugs: Vec<&str> = match provider {
            Some(slug) => vec![slug],
            None => all_slugs(),
        };
        for slug in slugs {
            let key = Self::cache_key(slug);
            if let Err(e) = self.cache.delete(&key).await {
                warn!(provider = slug, error = %e, "cache invalidation error");
            } else {
                debug!(provider = slug, "cache invalidated");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_settings(base_url: String) -> Arc<Settings> {
        Arc::new(Settings {
            database_url: "postgres://localhost/price_radar_test".to_string(),
            redis_url: "redis://localhost:6379/1".to_string(),
            exchange_rate_url: format!("{}/rates", base_url),
            provider_base_url: base_url,
            base_currency: "TRY".to_string(),
            collect_interval: Duration::from_secs(30),
            collector_cache_ttl_secs: 300,
            collector_timeout: Duration::from_secs(5),
            collector_max_retries: 0,
            breaker_failure_threshold: 5,
            breaker_success_threshold: 2,
            breaker_timeout: Duration::from_secs(60),
            breaker_half_open_max_calls: 3,
            trend_history_limit: 10,
            trending_top_n: 5,
            arbitrage_threshold_percent: 10.0,
            log_level: None,
        })
    }

    fn sport_direct_body() -> serde_json::Value {
        serde_json::json!({
            "provider": "SportDirect",
            "currency": "GBP",
            "products": [
                {
                    "product_id": 1,
                    "product_name": "Nike Pegasus 40",
                    "brand": "Nike",
                    "category": "Running",
                    "price_gbp": 130.95,
                    "stock_quantity": 100,
                    "in_stock": true
                }
            ]
        })
    }

    fn collector(base_url: String) -> Collector {
        Collector::new(
            test_settings(base_url),
            Arc::new(InMemoryCache::new()),
            Arc::new(CircuitBreakerRegistry::new()),
        )
    }

    #[tokio::test]
    async fn collects_and_then_serves_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/providers/sport-direct/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sport_direct_body()))
            .expect(1)
            .mount(&server)
            .await;

        let collector = collector(server.uri());
        let token = CancellationToken::new();

        let first = collector.collect_single("sport-direct", &token).await;
        assert!(first.success);
        assert!(!first.from_cache);
        assert_eq!(first.product_count(), 1);

        let second = collector.collect_single("sport-direct", &token).await;
        assert!(second.success);
        assert!(second.from_cache);
        assert_eq!(second.response_time_ms, 0);
        assert_eq!(second.product_count(), 1);
    }

    #[tokio::test]
    async fn open_circuit_skips_provider_without_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sport_direct_body()))
            .expect(0)
            .mount(&server)
            .await;

        let collector = collector(server.uri());
        let breaker = collector
            .breakers
            .get_or_create("sport-direct", collector.settings.breaker_config("sport-direct"));
        for _ in 0..5 {
            breaker.record_failure();
        }

        let token = CancellationToken::new();
        let result = collector.collect_single("sport-direct", &token).await;
        assert!(!result.success);
        assert!(result.skipped);
        assert!(result
            .error_message
            .as_deref()
            .unwrap_or_default()
            .contains("open"));
    }

    #[tokio::test]
    async fn provider_failures_are_isolated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/providers/sport-direct/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sport_direct_body()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/providers/outdoor-pro/products"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let collector = collector(server.uri());
        let token = CancellationToken::new();

        let report = collector
            .collect_all(
                Some(vec!["sport-direct".to_string(), "outdoor-pro".to_string()]),
                &token,
            )
            .await;

        assert_eq!(report.stats.total_providers, 2);
        assert_eq!(report.stats.successful_providers, 1);
        assert_eq!(report.stats.failed_providers, 1);
        assert_eq!(report.stats.total_products, 1);
        assert_eq!(report.all_records().len(), 1);
        assert!((report.stats.success_rate() - 50.0).abs() < f64::EPSILON);
        assert!(!report.circuit_snapshots.is_empty());
    }

    #[tokio::test]
    async fn unknown_provider_fails_fast() {
        let collector = collector("http://127.0.0.1:1".to_string());
        let token = CancellationToken::new();
        let result = collector.collect_single("no-such-provider", &token).await;
        assert!(!result.success);
        assert!(!result.skipped);
    }

    #[tokio::test]
    async fn invalidated_cache_forces_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/providers/sport-direct/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sport_direct_body()))
            .expect(2)
            .mount(&server)
            .await;

        let collector = collector(server.uri());
        let token = CancellationToken::new();

        assert!(collector.collect_single("sport-direct", &token).await.success);
        collector.invalidate_cache(Some("sport-direct")).await;
        let refetched = collector.collect_single("sport-direct", &token).await;
        assert!(refetched.success);
        assert!(!refetched.from_cache);
    }
}
