//! Market value poller
//!
//! Fetches a token's market value on a fixed interval. Failures only mark
//! the status as unavailable; the last good value is kept.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Poll period
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Latest known market value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStatus {
    /// No fetch has finished yet
    pub loading: bool,
    pub value: f64,
    pub updated_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Default for MarketStatus {
    fn default() -> Self {
        Self {
            loading: true,
            value: 0.0,
            updated_at: None,
            error: None,
        }
    }
}

impl MarketStatus {
    /// Status used when polling is disabled
    pub fn disabled() -> Self {
        Self {
            loading: false,
            ..Self::default()
        }
    }

    fn record(&mut self, result: Result<f64, MarketError>) {
        self.loading = false;
        match result {
            Ok(value) => {
                self.value = value;
                self.updated_at = Some(Utc::now());
                self.error = None;
            }
            Err(e) => self.error = Some(e.to_string()),
        }
    }
}

/// Polls `{api_url}/{token_address}`
#[derive(Clone)]
pub struct MarketFeed {
    client: Client,
    url: String,
}

impl MarketFeed {
    pub fn new(api_url: &str, token_address: &str) -> Self {
        Self {
            client: Client::new(),
            url: format!("{}/{}", api_url.trim_end_matches('/'), token_address),
        }
    }

    /// Fetch the current market value once
    pub async fn fetch(&self) -> Result<f64, MarketError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MarketError::Api {
                status: response.status().as_u16(),
            });
        }

        let body: Value = response.json().await?;
        extract_market_cap(&body)
    }

    /// Fetch immediately, then every [`POLL_INTERVAL`], until all receivers
    /// are dropped
    pub fn spawn(self) -> watch::Receiver<MarketStatus> {
        let (tx, rx) = watch::channel(MarketStatus::default());

        tokio::spawn(async move {
            info!(url = %self.url, "Market poller started");
            let mut ticker = interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = tx.closed() => break,
                }

                let result = self.fetch().await;
                match &result {
                    Ok(value) => debug!(value, "Market value updated"),
                    Err(e) => warn!(error = %e, "Market value unavailable"),
                }
                tx.send_modify(|status| status.record(result));
            }
        });

        rx
    }
}

/// Pull `pairs[0].marketCap` out of a token lookup response. The value may
/// be a number or a numeric string; a missing one counts as zero.
pub fn extract_market_cap(body: &Value) -> Result<f64, MarketError> {
    let pair = body
        .get("pairs")
        .and_then(Value::as_array)
        .and_then(|pairs| pairs.first())
        .ok_or(MarketError::NoPairs)?;

    match pair.get("marketCap") {
        None | Some(Value::Null) => Ok(0.0),
        Some(Value::Number(n)) => n.as_f64().ok_or(MarketError::Malformed),
        Some(Value::String(s)) => s.trim().parse().map_err(|_| MarketError::Malformed),
        Some(_) => Err(MarketError::Malformed),
    }
}

/// Market poller errors
#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error (status {status})")]
    Api { status: u16 },

    #[error("No trading pairs found")]
    NoPairs,

    #[error("Malformed market value")]
    Malformed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_and_string_values_are_accepted() {
        let body = json!({"pairs": [{"marketCap": 31500.5}, {"marketCap": 1}]});
        assert_eq!(extract_market_cap(&body).unwrap(), 31500.5);

        let body = json!({"pairs": [{"marketCap": "48000"}]});
        assert_eq!(extract_market_cap(&body).unwrap(), 48000.0);
    }

    #[test]
    fn missing_value_reads_as_zero() {
        let body = json!({"pairs": [{"priceUsd": "0.1"}]});
        assert_eq!(extract_market_cap(&body).unwrap(), 0.0);
    }

    #[test]
    fn empty_or_absent_pairs_are_an_error() {
        assert!(matches!(
            extract_market_cap(&json!({"pairs": []})),
            Err(MarketError::NoPairs)
        ));
        assert!(matches!(
            extract_market_cap(&json!({"pairs": null})),
            Err(MarketError::NoPairs)
        ));
        assert!(matches!(
            extract_market_cap(&json!({"pairs": [{"marketCap": "lots"}]})),
            Err(MarketError::Malformed)
        ));
    }

    #[test]
    fn failure_keeps_the_last_good_value() {
        let mut status = MarketStatus::default();
        status.record(Ok(42_000.0));
        assert!(!status.loading);
        assert!(status.updated_at.is_some());

        status.record(Err(MarketError::NoPairs));
        assert_eq!(status.value, 42_000.0);
        assert_eq!(status.error.as_deref(), Some("No trading pairs found"));

        status.record(Ok(43_000.0));
        assert_eq!(status.error, None);
        assert_eq!(status.value, 43_000.0);
    }
}
