//! Market-data sources.
//!
//! A source performs one request/response round trip per call and returns
//! validated records or a [`FetchError`]. Retrying is the poll loop's job.

pub mod binance;

use std::future::Future;

use crate::error::FetchError;
use crate::types::{MAX_DEPTH_LIMIT, OrderBook, TickerRecord};

/// Trait implemented by each market-data adapter.
pub trait MarketData: Send + Sync + 'static {
    /// Full 24h ticker snapshot, one record per symbol.
    fn fetch_tickers(&self) -> impl Future<Output = Result<Vec<TickerRecord>, FetchError>> + Send;

    /// Order book for `symbol` with at most `depth_limit` levels per side.
    ///
    /// The feed may return fewer levels than requested.
    fn fetch_order_book(
        &self,
        symbol: &str,
        depth_limit: usize,
    ) -> impl Future<Output = Result<OrderBook, FetchError>> + Send;
}

/// Reject order book requests the feed would refuse.
pub fn check_book_request(symbol: &str, depth_limit: usize) -> Result<(), FetchError> {
    if symbol.is_empty() {
        return Err(FetchError::InvalidRequest("symbol must not be empty".into()));
    }
    if depth_limit == 0 || depth_limit > MAX_DEPTH_LIMIT {
        return Err(FetchError::InvalidRequest(format!(
            "depth limit {depth_limit} outside 1..={MAX_DEPTH_LIMIT}"
        )));
    }
    Ok(())
}
