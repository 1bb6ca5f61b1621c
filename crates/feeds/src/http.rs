//! HTTP JSON price feed adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use sentinel_oracle::{
    Clock, OracleError, PriceSample, PriceSourceAdapter, SystemClock, STALE_PRICE_MAX_AGE_MS,
};

/// Samples whose upstream-reported confidence falls below this are rejected
/// at the adapter rather than fed into aggregation.
const MIN_SAMPLE_CONFIDENCE: f64 = 50.0;

/// Adapter for a REST price API serving `GET {base_url}/prices/{symbol}`.
#[derive(Debug, Clone)]
pub struct HttpPriceSource {
    source_id: String,
    client: reqwest::Client,
    base_url: String,
    clock: Arc<dyn Clock>,
}

impl HttpPriceSource {
    /// Create an adapter for one upstream API.
    pub fn new(source_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Override the clock used to stamp samples.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> OracleError {
        OracleError::SourceUnavailable {
            source_id: self.source_id.clone(),
            reason: reason.to_string(),
        }
    }

    /// Turn an upstream body into a sample, rejecting data the upstream
    /// itself marks as stale or unreliable.
    fn sample_from_response(
        &self,
        symbol: &str,
        body: PriceResponse,
    ) -> Result<PriceSample, OracleError> {
        let now = self.clock.now_ms();
        let timestamp_ms = body.timestamp_ms.unwrap_or(now);

        let age_ms = now.saturating_sub(timestamp_ms);
        if age_ms > STALE_PRICE_MAX_AGE_MS {
            return Err(OracleError::StalePrice {
                symbol: symbol.to_string(),
                age_ms,
            });
        }

        let confidence = body.confidence.unwrap_or(100.0);
        if confidence < MIN_SAMPLE_CONFIDENCE {
            return Err(OracleError::LowConfidence {
                symbol: symbol.to_string(),
                confidence,
                required: MIN_SAMPLE_CONFIDENCE,
            });
        }

        Ok(PriceSample {
            symbol: symbol.to_string(),
            price: body.price,
            timestamp_ms,
            source_id: self.source_id.clone(),
            confidence,
        })
    }
}

#[async_trait]
impl PriceSourceAdapter for HttpPriceSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch(&self, symbol: &str) -> Result<PriceSample, OracleError> {
        let url = format!("{}/prices/{}", self.base_url, symbol);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?;

        if !response.status().is_success() {
            return Err(self.unavailable(format!("HTTP {}", response.status())));
        }

        let body: PriceResponse = response.json().await.map_err(|e| self.unavailable(e))?;

        debug!(
            source = %self.source_id,
            symbol,
            price = body.price,
            "Fetched price"
        );

        self.sample_from_response(symbol, body)
    }
}

/// Upstream response body. Prices arrive as either a number or a string
/// depending on the API.
#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(deserialize_with = "deserialize_f64_from_string")]
    price: f64,
    #[serde(default)]
    timestamp_ms: Option<u64>,
    #[serde(default)]
    confidence: Option<f64>,
}

fn deserialize_f64_from_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        String(String),
        Number(f64),
    }

    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::String(s) => s.parse().map_err(serde::de::Error::custom),
        StringOrNumber::Number(n) => Ok(n),
    }
}
