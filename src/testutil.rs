//! Shared test fixtures and helpers.
//!
//! Reusable constructors for domain types plus a scripted [`MarketData`]
//! source, so each `#[cfg(test)]` block does not rebuild them.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::FetchError;
use crate::source::{MarketData, check_book_request};
use crate::types::{OrderBook, OrderBookLevel, TickerRecord};

pub(crate) fn ticker(symbol: &str, volume: f64, quote_volume: f64, trade_count: i64) -> TickerRecord {
    TickerRecord {
        symbol: symbol.to_owned(),
        volume,
        quote_volume,
        trade_count,
    }
}

pub(crate) fn lvl(price: f64, quantity: f64) -> OrderBookLevel {
    OrderBookLevel { price, quantity }
}

pub(crate) fn book(symbol: &str, bids: &[OrderBookLevel], asks: &[OrderBookLevel]) -> OrderBook {
    OrderBook {
        symbol: symbol.to_owned(),
        bids: bids.to_vec(),
        asks: asks.to_vec(),
    }
}

/// One bid and one ask, so both spread definitions agree: `ask - bid`.
pub(crate) fn touch_book(symbol: &str, bid: f64, ask: f64) -> OrderBook {
    book(symbol, &[lvl(bid, 1.0)], &[lvl(ask, 1.0)])
}

/// Source that replays queued responses. The last response of each queue
/// repeats once the queue is down to it.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    tickers: Mutex<VecDeque<Result<Vec<TickerRecord>, FetchError>>>,
    books: Mutex<HashMap<String, VecDeque<Result<OrderBook, FetchError>>>>,
    pub(crate) book_requests: Mutex<Vec<(String, usize)>>,
}

impl ScriptedSource {
    pub(crate) fn push_tickers(&self, r: Result<Vec<TickerRecord>, FetchError>) -> &Self {
        self.tickers.lock().unwrap().push_back(r);
        self
    }

    pub(crate) fn push_book(&self, symbol: &str, r: Result<OrderBook, FetchError>) -> &Self {
        self.books
            .lock()
            .unwrap()
            .entry(symbol.to_owned())
            .or_default()
            .push_back(r);
        self
    }
}

fn next<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl MarketData for ScriptedSource {
    async fn fetch_tickers(&self) -> Result<Vec<TickerRecord>, FetchError> {
        next(&mut self.tickers.lock().unwrap())
            .unwrap_or_else(|| Err(FetchError::network("/api/v3/ticker/24hr", "no script")))
    }

    async fn fetch_order_book(&self, symbol: &str, depth_limit: usize) -> Result<OrderBook, FetchError> {
        check_book_request(symbol, depth_limit)?;
        self.book_requests
            .lock()
            .unwrap()
            .push((symbol.to_owned(), depth_limit));
        let mut books = self.books.lock().unwrap();
        books
            .get_mut(symbol)
            .and_then(next)
            .unwrap_or_else(|| Err(FetchError::network("/api/v3/depth", format!("no script for {symbol}"))))
    }
}

// ---------------------------------------------------------------------------
// Shared JSON fixtures
// ---------------------------------------------------------------------------

/// Three-symbol `/ticker/24hr` payload, trimmed to the consumed fields plus a
/// few of the real envelope fields.
pub(crate) const TICKERS_JSON: &str = r#"[
    {"symbol":"BTCUSDT","priceChange":"-94.99","lastPrice":"67000.01","volume":"100.00000000","quoteVolume":"500.00000000","count":10},
    {"symbol":"ETHBTC","priceChange":"0.0001","lastPrice":"0.05","volume":"50.00000000","quoteVolume":"10.00000000","count":5},
    {"symbol":"LTCBTC","priceChange":"0.00001","lastPrice":"0.001","volume":"80.00000000","quoteVolume":"20.00000000","count":3}
]"#;

/// 3-level `/depth` snapshot; the last bid carries a legacy trailing element.
pub(crate) const DEPTH_JSON_3L: &str = r#"{"lastUpdateId":123456789,"bids":[["0.06824000","12.50000000"],["0.06823000","8.30000000"],["0.06822000","5.00000000",[]]],"asks":[["0.06825000","10.00000000"],["0.06826000","7.20000000"],["0.06827000","3.50000000"]]}"#;
