//! Exchange-rate service: cached cross-rates to the base currency (TRY) with
//! a fixed fallback table when the upstream is unavailable.
//!
//! Rates are expressed as "1 unit of `code` = N units of base".

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::cache::Cache;

pub const EXCHANGE_RATES_CACHE_KEY: &str = "exchange_rates";
const RATES_CACHE_TTL_SECS: u64 = 300;
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
enum RatesError {
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("upstream body missing usable rates")]
    MissingRates,
}

/// Last-resort table used whenever the upstream cannot be reached or its
/// body cannot be cross-rated.
pub fn fallback_rates() -> HashMap<String, f64> {
    HashMap::from([
        ("USD".to_string(), 34.20),
        ("EUR".to_string(), 37.50),
        ("GBP".to_string(), 43.10),
        ("TRY".to_string(), 1.0),
    ])
}

/// Provides current cross-rates to the base currency and converts amounts.
pub struct CurrencyService {
    rates_url: String,
    base_currency: String,
    cache: Arc<dyn Cache>,
    http: reqwest::Client,
}

impl CurrencyService {
    pub fn new(rates_url: impl Into<String>, base_currency: impl Into<String>, cache: Arc<dyn Cache>) -> Self {
        Self {
            rates_url: rates_url.into(),
            base_currency: base_currency.into(),
            cache,
            http: reqwest::Client::new(),
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    /// Current rates to the base currency. Cache first, then the upstream
    /// (cross-rated through the base), then the fallback table. Never fails.
    #[instrument(skip(self))]
    pub async fn get_exchange_rates(&self) -> HashMap<String, f64> {
        if let Ok(Some(cached)) = self.cache.get(EXCHANGE_RATES_CACHE_KEY).await {
            if let Ok(rates) = serde_json::from_str::<HashMap<String, f64>>(&cached) {
                debug!("exchange rates served from cache");
                return rates;
            }
        }

        match self.fetch_upstream().await {
            Ok(rates) => {
                if let Ok(encoded) = serde_json::to_string(&rates) {
                    if let Err(e) = self
                        .cache
                        .set(EXCHANGE_RATES_CACHE_KEY, &encoded, RATES_CACHE_TTL_SECS)
                        .await
                    {
                        warn!(error = %e, "failed to cache exchange rates");
                    }
                }
                rates
            }
            Err(e) => {
                warn!(error = %e, "exchange rate upstream failed, using fallback table");
                fallback_rates()
            }
        }
    }

    /// Converts `amount` in `code` to the base currency, rounded to 2
    /// decimals. Identity for the base; an unknown code returns the input
    /// unchanged with a warning, never an error.
    pub async fn convert(&self, amount: Decimal, code: &str) -> Decimal {
        let code_upper = code.to_uppercase();
        if code_upper == self.base_currency {
            return amount;
        }

        let rates = self.get_exchange_rates().await;
        match rates.get(&code_upper).and_then(|n: &f64| Decimal::from_f64(*n)) {
            Some(rate) => {
                (amount * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
            }
            None => {
                warn!(currency = %code_upper, "no exchange rate available, amount left unchanged");
                amount
            }
        }
    }

    /// Fetches the upstream body `{"rates": {CODE: number}}`. When the rates
    /// are relative to some base B that includes the base currency, every
    /// entry is cross-rated: rate[X] = rate_B[base] / rate_B[X].
    async fn fetch_upstream(&self) -> Result<HashMap<String, f64>, RatesError> {
        let response = self
            .http
            .get(&self.rates_url)
            .timeout(UPSTREAM_TIMEOUT)
            .send()
            .await
            .map_err(|e| RatesError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RatesError::Upstream(format!(
                "HTTP {}",
                response.status().as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RatesError::Upstream(e.to_string()))?;

        let upstream = body
            .get("rates")
            .and_then(Value::as_object)
            .ok_or(RatesError::MissingRates)?;

        let base_in_upstream = upstream
            .get(&self.base_currency)
            .and_then(Value::as_f64)
            .ok_or(RatesError::MissingRates)?;

        let mut rates = HashMap::with_capacity(upstream.len());
        for (code, value) in upstream {
            let Some(rate) = value.as_f64() else { continue };
            if rate == 0.0 {
                continue;
            }
            rates.insert(code.clone(), base_in_upstream / rate);
        }
        rates.insert(self.base_currency.clone(), 1.0);
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(url: String) -> CurrencyService {
        CurrencyService::new(url, "TRY", Arc::new(InMemoryCache::new()))
    }

    #[tokio::test]
    async fn cross_rates_through_the_base_currency() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "rates": {"TRY": 34.0, "USD": 1.0, "EUR": 0.85}
            })))
            .mount(&server)
            .await;

        let service = service(format!("{}/rates", server.uri()));
        let rates = service.get_exchange_rates().await;

        assert_eq!(rates["TRY"], 1.0);
        assert_eq!(rates["USD"], 34.0);
        assert!((rates["EUR"] - 40.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn upstream_failure_returns_fallback_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rates"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let service = service(format!("{}/rates", server.uri()));
        let rates = service.get_exchange_rates().await;
        assert_eq!(rates, fallback_rates());
    }

    #[tokio::test]
    async fn body_without_base_currency_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "rates": {"USD": 1.0, "EUR": 0.85}
            })))
            .mount(&server)
            .await;

        let service = service(format!("{}/rates", server.uri()));
        assert_eq!(service.get_exchange_rates().await, fallback_rates());
    }

    #[tokio::test]
    async fn successful_rates_are_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "rates": {"TRY": 34.0, "USD": 1.0}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(format!("{}/rates", server.uri()));
        let first = service.get_exchange_rates().await;
        let second = service.get_exchange_rates().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn convert_is_identity_for_base_currency() {
        let service = service("http://127.0.0.1:1/rates".to_string());
        assert_eq!(service.convert(dec!(150.00), "TRY").await, dec!(150.00));
    }

    #[tokio::test]
    async fn convert_multiplies_and_rounds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "rates": {"TRY": 34.20, "USD": 1.0}
            })))
            .mount(&server)
            .await;

        let service = service(format!("{}/rates", server.uri()));
        assert_eq!(service.convert(dec!(100.00), "USD").await, dec!(3420.00));
        assert_eq!(service.convert(dec!(1.005), "usd").await, dec!(34.37));
    }

    #[tokio::test]
    async fn unknown_currency_returns_amount_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rates"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "rates": {"TRY": 34.0, "USD": 1.0}
            })))
            .mount(&server)
            .await;

        let service = service(format!("{}/rates", server.uri()));
        assert_eq!(service.convert(dec!(99.90), "XXX").await, dec!(99.90));
    }
}
