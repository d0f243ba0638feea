//! Core domain types for ticker snapshots, order books and published metrics.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// Maximum order book depth the feed will serve for a single request.
pub const MAX_DEPTH_LIMIT: usize = 5000;

/// One symbol's 24h rolling statistics from a ticker snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct TickerRecord {
    pub symbol: String,
    /// Base-asset volume.
    pub volume: f64,
    /// Quote-asset volume.
    pub quote_volume: f64,
    pub trade_count: i64,
}

/// A single price level as delivered by the feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderBookLevel {
    pub price: f64,
    pub quantity: f64,
}

impl OrderBookLevel {
    #[inline]
    #[must_use]
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// Order book for one symbol, in feed order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderBook {
    pub symbol: String,
    /// Bids, highest price first.
    pub bids: Vec<OrderBookLevel>,
    /// Asks, lowest price first.
    pub asks: Vec<OrderBookLevel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bids,
    Asks,
}

impl fmt::Display for BookSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Bids => "bids",
            Self::Asks => "asks",
        })
    }
}

/// The metric half of a [`MetricKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricKind {
    PriceSpread,
    AbsDelta,
    NotionalBids,
    NotionalAsks,
}

impl MetricKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PriceSpread => "price_spread",
            Self::AbsDelta => "abs_delta",
            Self::NotionalBids => "notional_bids",
            Self::NotionalAsks => "notional_asks",
        }
    }

    /// Human-readable `# HELP` suffix.
    #[must_use]
    pub fn help(self) -> &'static str {
        match self {
            Self::PriceSpread => "Price Spread",
            Self::AbsDelta => "Absolute Delta",
            Self::NotionalBids => "Notional Value of Bids",
            Self::NotionalAsks => "Notional Value of Asks",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub symbol: String,
    pub metric: MetricKind,
}

impl MetricKey {
    pub fn new(symbol: impl Into<String>, metric: MetricKind) -> Self {
        Self {
            symbol: symbol.into(),
            metric,
        }
    }
}

/// Latest value of one metric for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolMetricValue {
    pub symbol: String,
    pub metric: MetricKind,
    pub value: f64,
    pub observed_at: DateTime<Utc>,
}

impl SymbolMetricValue {
    #[must_use]
    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.symbol.clone(), self.metric)
    }
}

/// Everything exposed to scrapers at one point in time. Immutable once
/// published.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricsSnapshot {
    /// Poll cycle that produced this snapshot; 0 before the first publish.
    pub cycle: u64,
    pub published_at: Option<DateTime<Utc>>,
    pub values: BTreeMap<MetricKey, SymbolMetricValue>,
}

impl MetricsSnapshot {
    #[must_use]
    pub fn get(&self, symbol: &str, metric: MetricKind) -> Option<f64> {
        self.values
            .get(&MetricKey::new(symbol, metric))
            .map(|v| v.value)
    }

    /// Distinct symbols present, in key order.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        let mut last: Option<&str> = None;
        self.values.keys().filter_map(move |k| {
            if last == Some(k.symbol.as_str()) {
                None
            } else {
                last = Some(k.symbol.as_str());
                last
            }
        })
    }

    #[must_use]
    pub fn contains_symbol(&self, symbol: &str) -> bool {
        self.values.keys().any(|k| k.symbol == symbol)
    }
}
