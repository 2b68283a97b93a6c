//! Currency exchange rate lookup via fixer.io.
//!
//! The inventory stores USD prices; clients render them in a local currency
//! using one cached rate. This instance is the only one with a configured
//! constant fallback: an approximate conversion is more useful to the end
//! user than none at all.

use crate::cache::{Backing, FetchError};
use crate::json::parse_json_with_path;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::info;

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    rates: HashMap<String, f64>,
}

pub struct RateBacking {
    pool: PgPool,
    http: reqwest::Client,
    api_url: String,
    access_key: String,
    from_currency: String,
    to_currency: String,
}

impl RateBacking {
    pub fn new(
        pool: PgPool,
        http: reqwest::Client,
        api_url: String,
        access_key: String,
        from_currency: String,
        to_currency: String,
    ) -> Self {
        Self {
            pool,
            http,
            api_url,
            access_key,
            from_currency,
            to_currency,
        }
    }
}

#[async_trait]
impl Backing for RateBacking {
    type Value = f64;

    fn source(&self) -> &'static str {
        "exchange-rate"
    }

    async fn load(&self) -> Result<Option<(f64, DateTime<Utc>)>, FetchError> {
        crate::data::rates::get(&self.pool, &self.from_currency, &self.to_currency)
            .await
            .map_err(FetchError::Unavailable)
    }

    async fn fetch(&self) -> Result<f64, FetchError> {
        let symbols = format!("{},{}", self.from_currency, self.to_currency);
        let response = self
            .http
            .get(&self.api_url)
            .query(&[
                ("access_key", self.access_key.as_str()),
                ("symbols", symbols.as_str()),
                ("format", "1"),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Unavailable(anyhow!(e).context("rate request failed")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unavailable(anyhow!(
                "rate API returned {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Unavailable(anyhow!(e).context("rate body read failed")))?;
        let parsed: ApiResponse = parse_json_with_path(&body).map_err(FetchError::Malformed)?;

        // The provider quotes everything against its own base currency, so
        // the cross rate is a ratio of the two symbols we asked for.
        let from_rate = parsed.rates.get(&self.from_currency).copied();
        let to_rate = parsed.rates.get(&self.to_currency).copied();
        let (Some(from_rate), Some(to_rate)) = (from_rate, to_rate) else {
            return Err(FetchError::Malformed(anyhow!(
                "rate response missing {} or {} rate",
                self.from_currency,
                self.to_currency
            )));
        };
        if from_rate == 0.0 {
            return Err(FetchError::Malformed(anyhow!(
                "rate response has zero {} rate",
                self.from_currency
            )));
        }

        let rate = to_rate / from_rate;
        info!(
            from = %self.from_currency,
            to = %self.to_currency,
            rate = format!("{rate:.4}"),
            "fetched exchange rate"
        );
        Ok(rate)
    }

    async fn store(&self, rate: &f64) -> Result<(), FetchError> {
        crate::data::rates::upsert(&self.pool, &self.from_currency, &self.to_currency, *rate)
            .await
            .map_err(FetchError::Unavailable)
    }
}
