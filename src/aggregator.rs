//! Order book aggregation: notional totals and bid/ask spread.
//!
//! Levels are consumed in feed order. Depth truncation takes the first `n`
//! levels as delivered, so nothing here ever re-sorts a side.

use clap::ValueEnum;

use crate::error::EmptyBookError;
use crate::types::{BookSide, OrderBook, OrderBookLevel};

/// Sum of `price * quantity` over the first `min(depth_limit, len)` levels.
#[inline]
#[must_use]
pub fn notional(levels: &[OrderBookLevel], depth_limit: usize) -> f64 {
    levels.iter().take(depth_limit).map(OrderBookLevel::notional).sum()
}

/// Highest ask minus lowest bid across the levels given.
pub fn spread(asks: &[OrderBookLevel], bids: &[OrderBookLevel]) -> Result<f64, EmptyBookError> {
    let max_ask = extreme(asks, BookSide::Asks, f64::max)?;
    let min_bid = extreme(bids, BookSide::Bids, f64::min)?;
    Ok(max_ask - min_bid)
}

/// Best ask minus best bid.
pub fn touch_spread(asks: &[OrderBookLevel], bids: &[OrderBookLevel]) -> Result<f64, EmptyBookError> {
    let best_ask = extreme(asks, BookSide::Asks, f64::min)?;
    let best_bid = extreme(bids, BookSide::Bids, f64::max)?;
    Ok(best_ask - best_bid)
}

fn extreme(
    levels: &[OrderBookLevel],
    side: BookSide,
    pick: fn(f64, f64) -> f64,
) -> Result<f64, EmptyBookError> {
    levels
        .iter()
        .map(|l| l.price)
        .reduce(pick)
        .ok_or(EmptyBookError { side })
}

/// Which spread definition the poller publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum SpreadMode {
    /// `max(ask) - min(bid)` over the fetched depth.
    #[default]
    Range,
    /// `min(ask) - max(bid)`: best ask minus best bid.
    Touch,
}

impl SpreadMode {
    /// Spread over the first `depth_limit` levels of each side.
    pub fn compute(self, book: &OrderBook, depth_limit: usize) -> Result<f64, EmptyBookError> {
        let asks = &book.asks[..depth_limit.min(book.asks.len())];
        let bids = &book.bids[..depth_limit.min(book.bids.len())];
        match self {
            Self::Range => spread(asks, bids),
            Self::Touch => touch_spread(asks, bids),
        }
    }
}

/// Notional value of both sides of one book.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BookTotals {
    pub bids: f64,
    pub asks: f64,
}

#[must_use]
pub fn totals(book: &OrderBook, depth_limit: usize) -> BookTotals {
    BookTotals {
        bids: notional(&book.bids, depth_limit),
        asks: notional(&book.asks, depth_limit),
    }
}
