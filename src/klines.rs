use crate::config::KlineConfig;
use crate::error::FetchError;
use reqwest::Client;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::time::Duration;

/// The exchange refuses `size` values above this.
pub const MAX_HISTORY_SIZE: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub timestamp: i64, // epoch seconds
    pub close: f64,
}

/// Candles for one (symbol, period), strictly ascending by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub candles: Vec<Candle>,
    /// Gap between the two most recent candles, in seconds.
    pub interval_secs: i64,
}

impl Series {
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

// --- Wire format ---

#[derive(Deserialize, Debug)]
struct HistoryResponse {
    status: Option<String>,
    #[serde(rename = "err-msg")]
    err_msg: Option<String>,
    #[serde(default)]
    data: Option<Vec<RawKline>>,
}

#[derive(Deserialize, Debug)]
struct RawKline {
    id: i64,
    #[serde(deserialize_with = "deserialize_f64_lenient")]
    close: f64,
}

struct LenientF64Visitor;

impl<'de> Visitor<'de> for LenientF64Visitor {
    type Value = f64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a float, an integer, or a string representing a number")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
        Ok(v)
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(v as f64)
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(v as f64)
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        v.trim().parse::<f64>().map_err(E::custom)
    }
}

fn deserialize_f64_lenient<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientF64Visitor)
}

/// Decodes a `/market/history/kline` body into an ascending series.
pub fn parse_history(body: &[u8]) -> Result<Series, FetchError> {
    let response: HistoryResponse = serde_json::from_slice(body)?;

    if response.status.as_deref() == Some("error") {
        return Err(FetchError::Api(
            response.err_msg.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    let mut candles: Vec<Candle> = response
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|k| Candle {
            timestamp: k.id,
            close: k.close,
        })
        .collect();

    // Provider sends newest first.
    candles.reverse();
    if !candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp) {
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);
    }

    if candles.len() < 2 {
        return Err(FetchError::InsufficientData { got: candles.len() });
    }

    let newest = candles[candles.len() - 1].timestamp;
    let previous = candles[candles.len() - 2].timestamp;

    Ok(Series {
        candles,
        interval_secs: (newest - previous).abs(),
    })
}

// --- Client ---

#[derive(Debug, Clone)]
pub struct MarketDataClient {
    client: Client,
    base_url: String,
}

impl MarketDataClient {
    pub fn new(config: &KlineConfig) -> Result<Self, FetchError> {
        let mut builder = Client::builder().pool_max_idle_per_host(16);
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetches up to `size` of the most recent candles for `symbol`/`period`.
    pub async fn fetch(&self, symbol: &str, period: &str, size: usize) -> Result<Series, FetchError> {
        let url = format!("{}/market/history/kline", self.base_url);
        let size = size.clamp(1, MAX_HISTORY_SIZE).to_string();
        let query = [("symbol", symbol), ("period", period), ("size", size.as_str())];

        let response = self.client.get(&url).query(&query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = response.bytes().await?;
        parse_history(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn newest_first_payload(timestamps: &[i64]) -> Vec<u8> {
        let data: Vec<_> = timestamps
            .iter()
            .map(|&ts| json!({ "id": ts, "open": 1.0, "close": ts as f64 / 1000.0, "vol": 3.5 }))
            .collect();
        serde_json::to_vec(&json!({ "ch": "market.btcusdt.kline.1day", "status": "ok", "data": data }))
            .unwrap()
    }

    #[test]
    fn test_newest_first_payload_becomes_ascending() {
        let body = newest_first_payload(&[5000, 4000, 3000, 2000, 1000]);
        let series = parse_history(&body).unwrap();

        let timestamps: Vec<i64> = series.candles.iter().map(|c| c.timestamp).collect();
        assert_eq!(timestamps, vec![1000, 2000, 3000, 4000, 5000]);
        assert!(series.candles.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert_eq!(series.interval_secs, 1000);
        assert_eq!(series.closes(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_out_of_order_and_duplicate_rows_are_normalized() {
        let body = newest_first_payload(&[3000, 5000, 1000, 3000, 4000]);
        let series = parse_history(&body).unwrap();

        let timestamps: Vec<i64> = series.candles.iter().map(|c| c.timestamp).collect();
        assert_eq!(timestamps, vec![1000, 3000, 4000, 5000]);
        assert_eq!(series.interval_secs, 1000);
    }

    #[test]
    fn test_interval_uses_most_recent_pair() {
        // Older gap is irregular; only the newest pair counts.
        let body = newest_first_payload(&[10_000, 9_100, 5_000]);
        let series = parse_history(&body).unwrap();
        assert_eq!(series.interval_secs, 900);
    }

    #[test]
    fn test_string_close_is_accepted() {
        let body = br#"{"status":"ok","data":[{"id":20,"close":"2.5"},{"id":10,"close":1}]}"#;
        let series = parse_history(body).unwrap();
        assert_eq!(series.closes(), vec![1.0, 2.5]);
    }

    #[test]
    fn test_single_candle_is_insufficient() {
        let body = newest_first_payload(&[1000]);
        assert!(matches!(
            parse_history(&body),
            Err(FetchError::InsufficientData { got: 1 })
        ));
    }

    #[test]
    fn test_exchange_error_envelope() {
        let body = br#"{"status":"error","err-code":"invalid-parameter","err-msg":"invalid symbol","data":null}"#;
        match parse_history(body) {
            Err(FetchError::Api(msg)) => assert_eq!(msg, "invalid symbol"),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(parse_history(b"<html>"), Err(FetchError::Decode(_))));
        assert!(matches!(
            parse_history(br#"{"data":[{"id":1,"close":"abc"}]}"#),
            Err(FetchError::Decode(_))
        ));
    }

    proptest! {
        /// Any newest-first payload comes out oldest-first with every candle
        /// kept and the interval taken from the two newest candles.
        #[test]
        fn newest_first_payloads_reverse_exactly(
            ascending in prop::collection::btree_set(0_i64..2_000_000_000, 2..300)
        ) {
            let ascending: Vec<i64> = ascending.into_iter().collect();
            let newest_first: Vec<i64> = ascending.iter().rev().copied().collect();

            let series = parse_history(&newest_first_payload(&newest_first)).unwrap();

            let timestamps: Vec<i64> = series.candles.iter().map(|c| c.timestamp).collect();
            prop_assert_eq!(&timestamps, &ascending);
            for candle in &series.candles {
                prop_assert_eq!(candle.close, candle.timestamp as f64 / 1000.0);
            }
            let n = ascending.len();
            prop_assert_eq!(series.interval_secs, ascending[n - 1] - ascending[n - 2]);
        }
    }
}
