//! Top-N ranking of ticker snapshots.
//!
//! Filtering keeps the snapshot's order, and the sort is stable, so symbols
//! with equal keys rank in the order the feed delivered them. That order
//! decides which symbol wins a tie at the cutoff.

use std::cmp::Ordering;

use crate::types::TickerRecord;

/// Numeric field to rank by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Volume,
    QuoteVolume,
    TradeCount,
}

impl SortKey {
    /// Descending order on this key.
    #[inline]
    fn descending(self, a: &TickerRecord, b: &TickerRecord) -> Ordering {
        match self {
            Self::Volume => b.volume.total_cmp(&a.volume),
            Self::QuoteVolume => b.quote_volume.total_cmp(&a.quote_volume),
            Self::TradeCount => b.trade_count.cmp(&a.trade_count),
        }
    }
}

/// Symbol suffix predicate, e.g. quote asset `BTC` matches `ETHBTC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteAsset(pub String);

impl QuoteAsset {
    pub fn new(asset: impl Into<String>) -> Self {
        Self(asset.into())
    }

    #[inline]
    #[must_use]
    pub fn matches(&self, record: &TickerRecord) -> bool {
        record.symbol.ends_with(self.0.as_str())
    }
}

/// Records satisfying `predicate`, sorted descending by `key`, truncated to `n`.
#[must_use]
pub fn top_n(
    records: &[TickerRecord],
    predicate: impl Fn(&TickerRecord) -> bool,
    key: SortKey,
    n: usize,
) -> Vec<TickerRecord> {
    if n == 0 {
        return Vec::new();
    }
    let mut ranked: Vec<TickerRecord> = records.iter().filter(|r| predicate(r)).cloned().collect();
    // `sort_by` is stable.
    ranked.sort_by(|a, b| key.descending(a, b));
    ranked.truncate(n);
    ranked
}

/// Symbols only, for the common case of feeding a ranking into order book fetches.
#[must_use]
pub fn top_symbols(records: &[TickerRecord], quote: &QuoteAsset, key: SortKey, n: usize) -> Vec<String> {
    top_n(records, |r| quote.matches(r), key, n)
        .into_iter()
        .map(|r| r.symbol)
        .collect()
}
