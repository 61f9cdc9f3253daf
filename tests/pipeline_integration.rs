//! End-to-end pipeline scenarios against a real PostgreSQL database.
//!
//! These tests are ignored by default; run them with a local database:
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/price_radar_test \
//!     cargo test -- --ignored --test-threads=1
//! ```
//!
//! Single-threaded because the trending table is fully replaced per batch.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal_macros::dec;
use sqlx::PgPool;
use uuid::Uuid;

use price_radar::cache::InMemoryCache;
use price_radar::currency::CurrencyService;
use price_radar::db::{self, UnitOfWork};
use price_radar::models::{PipelineRecord, PriceValue, TrendDirection, TrendMetrics};
use price_radar::pipeline::stages::UpdateTrendingStage;
use price_radar::pipeline::{analysis_pipeline, Pipeline, Stage};
use price_radar::Settings;

fn test_settings() -> Settings {
    Settings {
        database_url: std::env::var("DATABASE_URL").unwrap_or_default(),
        redis_url: "redis://localhost:6379/1".to_string(),
        // Unroutable: the currency service falls back to its fixed table
        // (USD 34.20, EUR 37.50), which these scenarios rely on.
        exchange_rate_url: "http://127.0.0.1:1/rates".to_string(),
        provider_base_url: "http://127.0.0.1:1".to_string(),
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
    }
}

async fn setup() -> (PgPool, Pipeline) {
    let settings = test_settings();
    let pool = db::create_pool(&settings.database_url)
        .await
        .expect("test database must be reachable");
    db::run_migrations(&pool).await.expect("migrations apply");
    db::seed_reference_data(&pool).await.expect("seed applies");

    let currency = Arc::new(CurrencyService::new(
        settings.exchange_rate_url.clone(),
        settings.base_currency.clone(),
        Arc::new(InMemoryCache::new()),
    ));
    let pipeline = analysis_pipeline(currency, &settings);
    (pool, pipeline)
}

fn record(
    provider_id: i32,
    external_code: &str,
    name: &str,
    price: PriceValue,
    currency: &str,
) -> PipelineRecord {
    PipelineRecord {
        provider_slug: "sport-direct".to_string(),
        provider_id: Some(provider_id),
        external_code: external_code.to_string(),
        name: name.to_string(),
        brand: Some("Nike".to_string()),
        category: Some("Running".to_string()),
        raw_price: price,
        currency_code: currency.to_string(),
        in_stock: true,
        stock_quantity: Some(10),
        product_url: None,
        colors: Vec::new(),
        sizes: Vec::new(),
        collected_at: Utc::now(),
        normalized: None,
        mapping_id: None,
        existing_product_id: None,
        product_id: None,
        price_history_id: None,
        trend: None,
        margin: None,
        weighting: None,
    }
}

async fn sport_direct_id(pool: &PgPool) -> i32 {
    let mut uow = UnitOfWork::begin(pool).await.unwrap();
    let providers = uow.providers().by_slug().await.unwrap();
    let id = providers["sport-direct"].id;
    uow.rollback().await.unwrap();
    id
}

#[tokio::test]
#[ignore]
async fn happy_path_two_products() {
    let (pool, pipeline) = setup().await;
    let provider_id = sport_direct_id(&pool).await;
    let run = Uuid::new_v4().simple().to_string();

    let records = vec![
        record(
            provider_id,
            &format!("A-{}", run),
            &format!("Nike Air {}", run),
            PriceValue::Text("$100.00".to_string()),
            "USD",
        ),
        record(
            provider_id,
            &format!("B-{}", run),
            &format!("Adidas X {}", run),
            PriceValue::Text("189,00".to_string()),
            "EUR",
        ),
    ];

    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let ctx = pipeline.execute(records, &mut uow).await;

    assert!(ctx.hard_errors.is_empty(), "hard errors: {:?}", ctx.hard_errors);
    assert!(ctx.errors.is_empty(), "errors: {:?}", ctx.errors);
    assert_eq!(ctx.count("normalized_count"), 2);
    assert_eq!(ctx.count("mappings_processed"), 2);
    assert_eq!(ctx.count("products_created"), 2);
    assert_eq!(ctx.count("saved_price_records"), 2);

    // Both records carry distinct mappings and converted prices.
    let mapping_ids: Vec<i32> = ctx.result.iter().filter_map(|r| r.mapping_id).collect();
    assert_eq!(mapping_ids.len(), 2);
    assert_ne!(mapping_ids[0], mapping_ids[1]);

    let first = ctx.result[0].normalized.as_ref().unwrap();
    assert_eq!(first.price, dec!(3420.00));
    assert_eq!(first.currency, "TRY");
    let second = ctx.result[1].normalized.as_ref().unwrap();
    assert_eq!(second.price, dec!(7087.50));

    let history = uow
        .price_histories()
        .recent_for_mapping(mapping_ids[0], None, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].price, dec!(3420.00));

    uow.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn parse_failure_is_isolated_to_one_record() {
    let (pool, pipeline) = setup().await;
    let provider_id = sport_direct_id(&pool).await;
    let run = Uuid::new_v4().simple().to_string();

    let records = vec![
        record(
            provider_id,
            &format!("A-{}", run),
            &format!("Salomon Trail {}", run),
            PriceValue::Number(100.0),
            "TRY",
        ),
        record(
            provider_id,
            "B",
            &format!("Ghost Product {}", run),
            PriceValue::Text("Fiyat Yok".to_string()),
            "USD",
        ),
    ];

    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let ctx = pipeline.execute(records, &mut uow).await;

    assert!(ctx.hard_errors.is_empty());
    assert_eq!(ctx.count("saved_price_records"), 1);
    assert!(ctx.errors.iter().any(|e| e.contains("ID B: price parse failed")));

    // Stages after normalization never saw record B.
    assert_eq!(ctx.result.len(), 1);
    assert_eq!(ctx.result[0].external_code, format!("A-{}", run));

    uow.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn rerunning_a_batch_is_idempotent_for_mappings() {
    let (pool, pipeline) = setup().await;
    let provider_id = sport_direct_id(&pool).await;
    let run = Uuid::new_v4().simple().to_string();

    let batch = || {
        vec![record(
            provider_id,
            &format!("R-{}", run),
            &format!("Asics Gel {}", run),
            PriceValue::Number(2000.0),
            "TRY",
        )]
    };

    let mut first = UnitOfWork::begin(&pool).await.unwrap();
    let ctx1 = pipeline.execute(batch(), &mut first).await;
    assert!(ctx1.hard_errors.is_empty());
    first.commit().await.unwrap();

    let mut second = UnitOfWork::begin(&pool).await.unwrap();
    let ctx2 = pipeline.execute(batch(), &mut second).await;
    assert!(ctx2.hard_errors.is_empty());
    second.commit().await.unwrap();

    // Same mapping both times, no second mapping row, no second product.
    let m1 = ctx1.result[0].mapping_id.unwrap();
    let m2 = ctx2.result[0].mapping_id.unwrap();
    assert_eq!(m1, m2);
    assert_eq!(ctx2.count("products_created"), 0);
    assert_eq!(ctx2.count("products_matched_existing"), 0); // matched via mapping

    // History is append-only: the second run added exactly one row.
    let mut check = UnitOfWork::begin(&pool).await.unwrap();
    let history = check
        .price_histories()
        .recent_for_mapping(m1, None, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);

    // Trending was fully replaced, not duplicated.
    let trending = check.trending_products().all_ranked().await.unwrap();
    let ranks: Vec<i32> = trending.iter().map(|t| t.rank).collect();
    let expected: Vec<i32> = (1..=trending.len() as i32).collect();
    assert_eq!(ranks, expected);
    check.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn seeded_history_produces_clamped_upward_trend() {
    let (pool, pipeline) = setup().await;
    let provider_id = sport_direct_id(&pool).await;
    let run = Uuid::new_v4().simple().to_string();
    let code = format!("T-{}", run);

    // Seed five observations, oldest first, so the newest-first window
    // reads [80, 70, 60, 50, 40].
    {
        let mut seed = UnitOfWork::begin(&pool).await.unwrap();
        let mapping = seed
            .product_mappings()
            .find_or_create(provider_id, &code, None)
            .await
            .unwrap();
        let currency_ids = seed.currencies().code_to_id().await.unwrap();
        let try_id = currency_ids["TRY"];
        for price in [40, 50, 60, 70, 80] {
            seed.price_histories()
                .insert_bulk(&[price_radar::db::models::NewPriceHistory {
                    mapping_id: mapping.id,
                    price: rust_decimal::Decimal::from(price),
                    original_price: None,
                    discount_rate: None,
                    currency_id: try_id,
                    in_stock: true,
                    stock_quantity: None,
                }])
                .await
                .unwrap();
        }
        seed.commit().await.unwrap();
    }

    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let ctx = pipeline
        .execute(
            vec![record(
                provider_id,
                &code,
                &format!("Trend Runner {}", run),
                PriceValue::Number(100.0),
                "TRY",
            )],
            &mut uow,
        )
        .await;

    let trend = ctx.result[0].trend.as_ref().expect("trend computed");
    assert_eq!(trend.trend_direction, TrendDirection::Up);
    assert_eq!(trend.avg_price, 60.0);
    assert_eq!(trend.trend_score, 100);
    assert!(trend.has_sufficient_data);

    uow.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn trending_refresh_keeps_top_five_by_absolute_score() {
    let (pool, _) = setup().await;
    let provider_id = sport_direct_id(&pool).await;
    let run = Uuid::new_v4().simple().to_string();

    let mut uow = UnitOfWork::begin(&pool).await.unwrap();

    // Eight products with crafted scores.
    let scores = [90, -80, 70, -60, 50, 10, 5, 0];
    let mut records = Vec::new();
    for (i, score) in scores.iter().enumerate() {
        let product = uow
            .products()
            .insert(&price_radar::db::models::NewProduct {
                name: format!("trending product {} {}", i, run),
                slug: format!("trending-product-{}-{}", i, run),
                brand: None,
                description: None,
            })
            .await
            .unwrap();

        let mut rec = record(
            provider_id,
            &format!("TR-{}-{}", i, run),
            &format!("trending product {} {}", i, run),
            PriceValue::Number(100.0),
            "TRY",
        );
        rec.product_id = Some(product.id);
        rec.trend = Some(TrendMetrics {
            trend_score: *score,
            trend_direction: TrendDirection::Stable,
            price_change_percent: 0.0,
            avg_price: 100.0,
            min_price: 100.0,
            max_price: 100.0,
            has_sufficient_data: true,
        });
        records.push(rec);
    }

    let stage = UpdateTrendingStage::new(5);
    let mut ctx = price_radar::PipelineContext::new(records);
    stage.process(&mut ctx, &mut uow).await;

    assert!(ctx.hard_errors.is_empty());
    assert_eq!(ctx.count("trending_updated"), 5);

    let trending = uow.trending_products().all_ranked().await.unwrap();
    assert_eq!(trending.len(), 5);
    let ranked_scores: Vec<i32> = trending.iter().map(|t| t.trend_score).collect();
    assert_eq!(ranked_scores, vec![90, -80, 70, -60, 50]);
    let ranks: Vec<i32> = trending.iter().map(|t| t.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3, 4, 5]);

    uow.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn find_or_create_mapping_is_idempotent_within_a_transaction() {
    let (pool, _) = setup().await;
    let provider_id = sport_direct_id(&pool).await;
    let code = format!("IDEM-{}", Uuid::new_v4().simple());

    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let first = uow
        .product_mappings()
        .find_or_create(provider_id, &code, Some("https://example.test/p"))
        .await
        .unwrap();
    let second = uow
        .product_mappings()
        .find_or_create(provider_id, &code, None)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    uow.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn variants_are_created_for_new_products_with_colors_and_sizes() {
    let (pool, pipeline) = setup().await;
    let provider_id = sport_direct_id(&pool).await;
    let run = Uuid::new_v4().simple().to_string();

    let mut rec = record(
        provider_id,
        &format!("V-{}", run),
        &format!("Variant Shoe {}", run),
        PriceValue::Number(1500.0),
        "TRY",
    );
    rec.colors = vec!["Blue".to_string(), "Red".to_string()];
    rec.sizes = vec!["42".to_string(), "43".to_string()];

    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let ctx = pipeline.execute(vec![rec], &mut uow).await;

    assert!(ctx.hard_errors.is_empty());
    assert_eq!(ctx.count("products_created"), 1);
    assert_eq!(ctx.count("variants_created"), 4);

    uow.rollback().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn missing_provider_id_drops_the_record_before_persistence() {
    let (pool, pipeline) = setup().await;
    let run = Uuid::new_v4().simple().to_string();

    let mut rec = record(
        1,
        &format!("NP-{}", run),
        &format!("Orphan Product {}", run),
        PriceValue::Number(100.0),
        "TRY",
    );
    rec.provider_id = None;

    let mut uow = UnitOfWork::begin(&pool).await.unwrap();
    let ctx = pipeline.execute(vec![rec], &mut uow).await;

    assert!(ctx.result.is_empty());
    assert!(ctx.errors.iter().any(|e| e.contains("provider_id missing")));
    assert_eq!(ctx.count("saved_price_records"), 0);

    uow.rollback().await.unwrap();
}
