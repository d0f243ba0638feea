//! Binance REST v3 adapter.
//!
//! Two endpoints: `/api/v3/ticker/24hr` for the full ticker snapshot and
//! `/api/v3/depth` for one symbol's order book. Numeric fields arrive as
//! decimal strings and are validated while deserializing, so a malformed
//! record fails the whole payload with a protocol error up front.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde::de::{self, Deserializer, IgnoredAny, SeqAccess, Visitor};
use tracing::debug;

use crate::error::FetchError;
use crate::types::{OrderBook, OrderBookLevel, TickerRecord};

use super::{MarketData, check_book_request};

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

const TICKER_PATH: &str = "/api/v3/ticker/24hr";
const DEPTH_PATH: &str = "/api/v3/depth";

/// Bytes of an error body kept for the log line.
const BODY_HEAD: usize = 200;

#[derive(Debug, Clone)]
pub struct Binance {
    client: Client,
    base_url: String,
}

impl Binance {
    /// `timeout` bounds each request end to end; exceeding it is a network error.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("spread-exporter/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_text(
        &self,
        path: &str,
        query: &[(&str, &str)],
        endpoint: &str,
    ) -> Result<String, FetchError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::network(endpoint, "request timed out")
                } else {
                    FetchError::network(endpoint, e)
                }
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::network(endpoint, e))?;

        if !status.is_success() {
            return Err(FetchError::protocol(
                endpoint,
                format!("HTTP {status}: {}", head(&body)),
            ));
        }
        debug!(endpoint, bytes = body.len(), "fetched");
        Ok(body)
    }
}

impl MarketData for Binance {
    async fn fetch_tickers(&self) -> Result<Vec<TickerRecord>, FetchError> {
        let body = self.get_text(TICKER_PATH, &[], TICKER_PATH).await?;
        parse_tickers(&body)
    }

    async fn fetch_order_book(&self, symbol: &str, depth_limit: usize) -> Result<OrderBook, FetchError> {
        check_book_request(symbol, depth_limit)?;
        let limit = depth_limit.to_string();
        let endpoint = format!("{DEPTH_PATH}?symbol={symbol}&limit={limit}");
        let body = self
            .get_text(DEPTH_PATH, &[("symbol", symbol), ("limit", limit.as_str())], &endpoint)
            .await?;
        parse_depth(symbol, &body, &endpoint)
    }
}

/// First [`BODY_HEAD`] bytes of `body`, cut on a char boundary.
fn head(body: &str) -> &str {
    let mut end = body.len().min(BODY_HEAD);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTicker {
    symbol: String,
    volume: WireNumber,
    quote_volume: WireNumber,
    count: i64,
}

#[derive(Deserialize)]
struct WireDepth {
    bids: Vec<WireLevel>,
    asks: Vec<WireLevel>,
}

/// Finite `f64` carried as a decimal string (or, leniently, a JSON number).
struct WireNumber(f64);

impl<'de> Deserialize<'de> for WireNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NumberVisitor;

        impl Visitor<'_> for NumberVisitor {
            type Value = WireNumber;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<WireNumber, E> {
                let n: f64 = v
                    .parse()
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))?;
                finite(n)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<WireNumber, E> {
                finite(v)
            }

            #[allow(clippy::cast_precision_loss)]
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<WireNumber, E> {
                Ok(WireNumber(v as f64))
            }

            #[allow(clippy::cast_precision_loss)]
            fn visit_i64<E: de::Error>(self, v: i64) -> Result<WireNumber, E> {
                Ok(WireNumber(v as f64))
            }
        }

        fn finite<E: de::Error>(v: f64) -> Result<WireNumber, E> {
            if v.is_finite() {
                Ok(WireNumber(v))
            } else {
                Err(E::custom(format!("non-finite number {v}")))
            }
        }

        deserializer.deserialize_any(NumberVisitor)
    }
}

/// `[price, quantity, ...]`. Trailing elements are ignored.
struct WireLevel(OrderBookLevel);

impl<'de> Deserialize<'de> for WireLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LevelVisitor;

        impl<'de> Visitor<'de> for LevelVisitor {
            type Value = WireLevel;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a [price, quantity] array")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<WireLevel, A::Error> {
                let WireNumber(price) = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let WireNumber(quantity) = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                while seq.next_element::<IgnoredAny>()?.is_some() {}
                Ok(WireLevel(OrderBookLevel { price, quantity }))
            }
        }

        deserializer.deserialize_seq(LevelVisitor)
    }
}

/// Decode a `/ticker/24hr` payload.
pub fn parse_tickers(json: &str) -> Result<Vec<TickerRecord>, FetchError> {
    let wire: Vec<WireTicker> =
        serde_json::from_str(json).map_err(|e| FetchError::protocol(TICKER_PATH, e))?;

    let mut seen = HashSet::with_capacity(wire.len());
    let mut records = Vec::with_capacity(wire.len());
    for t in wire {
        if t.symbol.is_empty() {
            return Err(FetchError::protocol(TICKER_PATH, "ticker with empty symbol"));
        }
        if !seen.insert(t.symbol.clone()) {
            return Err(FetchError::protocol(
                TICKER_PATH,
                format!("duplicate symbol {}", t.symbol),
            ));
        }
        records.push(TickerRecord {
            symbol: t.symbol,
            volume: t.volume.0,
            quote_volume: t.quote_volume.0,
            trade_count: t.count,
        });
    }
    Ok(records)
}

/// Decode a `/depth` payload for `symbol`. Level order is preserved.
pub fn parse_depth(symbol: &str, json: &str, endpoint: &str) -> Result<OrderBook, FetchError> {
    let wire: WireDepth =
        serde_json::from_str(json).map_err(|e| FetchError::protocol(endpoint, e))?;
    Ok(OrderBook {
        symbol: symbol.to_owned(),
        bids: wire.bids.into_iter().map(|l| l.0).collect(),
        asks: wire.asks.into_iter().map(|l| l.0).collect(),
    })
}
