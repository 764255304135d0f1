//! Last-price source backed by an exchange REST ticker.
//!
//! Issues `GET {base_url}/api/v3/ticker/price?symbol={BASEQUOTE}` and reads the
//! `price` field, which the exchange returns as a decimal string. One attempt
//! per call: retries belong to the scheduler, not the price source.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use super::{PriceSource, ProviderError};
use crate::domain::Pair;

/// Connection settings handed to exchange adapters at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeSettings {
    pub base_url: String,
    /// Sent as `X-MBX-APIKEY` when present.
    #[serde(default)]
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".into(),
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TickerResponse {
    symbol: String,
    price: String,
}

/// Blocking REST ticker client with a circuit breaker.
pub struct HttpTicker {
    client: reqwest::blocking::Client,
    settings: ExchangeSettings,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl HttpTicker {
    /// Build the HTTP client. Fails only on an unusable API key or TLS setup.
    pub fn new(
        settings: ExchangeSettings,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, ProviderError> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = settings.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = reqwest::header::HeaderValue::from_str(key)
                .map_err(|e| ProviderError::Unavailable(format!("invalid API key header: {e}")))?;
            headers.insert("X-MBX-APIKEY", value);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(settings.timeout)
            .default_headers(headers)
            .user_agent(concat!("pairtrader/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            settings,
            circuit_breaker,
        })
    }

    /// Full ticker URL for `pair`.
    pub fn ticker_url(&self, pair: &Pair) -> String {
        format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.settings.base_url.trim_end_matches('/'),
            pair.exchange_symbol()
        )
    }

    /// Parse a ticker body. Garbage counts against the breaker like any
    /// other failed call.
    fn price_from_body(&self, pair: &Pair, body: &str) -> Result<f64, ProviderError> {
        let parsed = serde_json::from_str::<TickerResponse>(body)
            .map_err(|e| ProviderError::Malformed(format!("ticker response: {e}")))
            .and_then(|ticker| Self::parse_price(pair, ticker));
        match parsed {
            Ok(price) => {
                self.circuit_breaker.record_success();
                Ok(price)
            }
            Err(e) => {
                warn!(error = %e, "unusable ticker response");
                self.circuit_breaker.record_failure();
                Err(e)
            }
        }
    }

    fn parse_price(pair: &Pair, body: TickerResponse) -> Result<f64, ProviderError> {
        if body.symbol != pair.exchange_symbol() {
            return Err(ProviderError::Malformed(format!(
                "ticker answered for {} instead of {}",
                body.symbol,
                pair.exchange_symbol()
            )));
        }
        let price: f64 = body
            .price
            .trim()
            .parse()
            .map_err(|_| ProviderError::Malformed(format!("unparseable price {:?}", body.price)))?;
        if !price.is_finite() || price <= 0.0 {
            return Err(ProviderError::Malformed(format!("non-positive price {price}")));
        }
        Ok(price)
    }
}

impl PriceSource for HttpTicker {
    fn last_price(&self, pair: &Pair) -> Result<f64, ProviderError> {
        self.circuit_breaker.check().map_err(ProviderError::CircuitOpen)?;

        let url = self.ticker_url(pair);
        debug!(%url, "requesting ticker");

        let resp = match self.client.get(&url).send() {
            Ok(resp) => resp,
            Err(e) => {
                self.circuit_breaker.record_failure();
                if e.is_timeout() {
                    return Err(ProviderError::Timeout(self.settings.timeout));
                }
                return Err(ProviderError::Unavailable(e.to_string()));
            }
        };

        let status = resp.status();
        // 418 is the exchange's IP-ban response.
        if status == reqwest::StatusCode::FORBIDDEN || status.as_u16() == 418 {
            warn!(%status, "exchange refused access, tripping circuit breaker");
            self.circuit_breaker.trip();
            return Err(ProviderError::Unavailable(format!("HTTP {status}")));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.circuit_breaker.record_failure();
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            self.circuit_breaker.record_failure();
            return Err(ProviderError::Unavailable(format!("HTTP {status} for {url}")));
        }

        let body = match resp.text() {
            Ok(body) => body,
            Err(e) => {
                self.circuit_breaker.record_failure();
                return Err(ProviderError::Unavailable(format!("reading ticker response: {e}")));
            }
        };
        self.price_from_body(pair, &body)
    }
}
