//! One-shot report: both rankings, the notional totals of the volume leaders
//! and the spreads of the trade-count leaders, fetched once and printed as
//! plain-text tables.

use std::fmt::{self, Write as _};

use futures_util::future::join_all;

use crate::aggregator::totals;
use crate::error::FetchError;
use crate::poller::PollSettings;
use crate::ranking::{SortKey, top_n};
use crate::source::MarketData;
use crate::types::TickerRecord;

/// Per-symbol result; a failed fetch or an empty side is reported in place.
type Cell<T> = Result<T, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub volume_quote: String,
    pub trades_quote: String,
    pub notional_depth: usize,
    pub spread_depth: usize,
    pub volume_leaders: Vec<TickerRecord>,
    pub trade_leaders: Vec<TickerRecord>,
    /// `(symbol, bids, asks)` for each volume leader.
    pub notional: Vec<(String, Cell<(f64, f64)>)>,
    /// `(symbol, spread)` for each trade-count leader.
    pub spreads: Vec<(String, Cell<f64>)>,
}

impl Report {
    /// Fetch everything once. Only a failed ticker fetch fails the report.
    pub async fn collect<S: MarketData>(source: &S, settings: &PollSettings) -> Result<Self, FetchError> {
        let tickers = source.fetch_tickers().await?;
        let volume_leaders = top_n(
            &tickers,
            |r| settings.volume_quote.matches(r),
            SortKey::QuoteVolume,
            settings.top_n,
        );
        let trade_leaders = top_n(
            &tickers,
            |r| settings.trades_quote.matches(r),
            SortKey::TradeCount,
            settings.top_n,
        );

        let notional = join_all(volume_leaders.iter().map(|r| async move {
            let cell = source
                .fetch_order_book(&r.symbol, settings.notional_depth)
                .await
                .map(|book| {
                    let t = totals(&book, settings.notional_depth);
                    (t.bids, t.asks)
                })
                .map_err(|e| e.to_string());
            (r.symbol.clone(), cell)
        }))
        .await;

        let spreads = join_all(trade_leaders.iter().map(|r| async move {
            let cell = match source.fetch_order_book(&r.symbol, settings.spread_depth).await {
                Ok(book) => settings
                    .spread_mode
                    .compute(&book, settings.spread_depth)
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            (r.symbol.clone(), cell)
        }))
        .await;

        Ok(Self {
            volume_quote: settings.volume_quote.0.clone(),
            trades_quote: settings.trades_quote.0.clone(),
            notional_depth: settings.notional_depth,
            spread_depth: settings.spread_depth,
            volume_leaders,
            trade_leaders,
            notional,
            spreads,
        })
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(2048);
        // Writing into a String cannot fail.
        let _ = self.write_tables(&mut out);
        out
    }

    fn write_tables(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "Top {} {} symbols by quote volume", self.volume_leaders.len(), self.volume_quote)?;
        writeln!(out, "{:<16} {:>24}", "symbol", "quote_volume")?;
        for r in &self.volume_leaders {
            writeln!(out, "{:<16} {:>24.8}", r.symbol, r.quote_volume)?;
        }

        writeln!(out)?;
        writeln!(out, "Top {} {} symbols by trade count", self.trade_leaders.len(), self.trades_quote)?;
        writeln!(out, "{:<16} {:>24}", "symbol", "trades")?;
        for r in &self.trade_leaders {
            writeln!(out, "{:<16} {:>24}", r.symbol, r.trade_count)?;
        }

        writeln!(out)?;
        writeln!(out, "Notional value of the top {} levels", self.notional_depth)?;
        writeln!(out, "{:<16} {:>24} {:>24}", "symbol", "bids", "asks")?;
        for (symbol, cell) in &self.notional {
            match cell {
                Ok((bids, asks)) => writeln!(out, "{symbol:<16} {bids:>24.8} {asks:>24.8}")?,
                Err(e) => writeln!(out, "{symbol:<16} error: {e}")?,
            }
        }

        writeln!(out)?;
        writeln!(out, "Price spread over the top {} levels", self.spread_depth)?;
        writeln!(out, "{:<16} {:>24}", "symbol", "spread")?;
        for (symbol, cell) in &self.spreads {
            match cell {
                Ok(spread) => writeln!(out, "{symbol:<16} {spread:>24.8}")?,
                Err(e) => writeln!(out, "{symbol:<16} error: {e}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
