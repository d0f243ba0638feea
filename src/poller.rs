//! Fixed-interval poll loop.
//!
//! Each cycle fetches the ticker snapshot, ranks it, fetches the order books
//! of the ranked symbols, computes notional totals, spreads and spread
//! deltas, and publishes one complete [`MetricsSnapshot`].
//!
//! Failures are contained at the smallest scope: a failed ticker fetch
//! abandons the cycle and leaves the previous snapshot exposed; a failed
//! order book fetch or an empty book side leaves that symbol's last values in
//! place while every other symbol updates.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregator::{SpreadMode, totals};
use crate::delta::DeltaTracker;
use crate::error::FetchError;
use crate::metrics::PollMetrics;
use crate::ranking::{QuoteAsset, SortKey, top_symbols};
use crate::registry::MetricsRegistry;
use crate::source::MarketData;
use crate::types::{MetricKey, MetricKind, MetricsSnapshot, SymbolMetricValue};

/// Consecutive order book failures after which a symbol is reported degraded.
pub const DEGRADED_AFTER: u32 = 3;

#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Start-to-start period of the cycle.
    pub interval: Duration,
    pub top_n: usize,
    pub notional_depth: usize,
    pub spread_depth: usize,
    /// Quote asset of the volume ranking, whose symbols get notional gauges.
    pub volume_quote: QuoteAsset,
    /// Quote asset of the trade-count ranking, whose symbols get spread gauges.
    pub trades_quote: QuoteAsset,
    pub spread_mode: SpreadMode,
    pub degraded_after: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            top_n: 5,
            notional_depth: 200,
            spread_depth: 100,
            volume_quote: QuoteAsset::new("BTC"),
            trades_quote: QuoteAsset::new("USDT"),
            spread_mode: SpreadMode::Range,
            degraded_after: DEGRADED_AFTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Published { cycle: u64, series: usize },
    /// Ticker snapshot unavailable; nothing was published.
    Abandoned { cycle: u64, error: FetchError },
}

/// One order book fetch of a cycle and what it feeds.
struct BookJob {
    symbol: String,
    depth: usize,
    notional: bool,
    spread: bool,
}

pub struct Poller<S> {
    source: S,
    settings: PollSettings,
    registry: Arc<MetricsRegistry>,
    metrics: Arc<PollMetrics>,
    tracker: DeltaTracker,
    /// Consecutive order book failures per live symbol.
    failures: HashMap<String, u32>,
    cycle: u64,
}

impl<S: MarketData> Poller<S> {
    pub fn new(
        source: S,
        settings: PollSettings,
        registry: Arc<MetricsRegistry>,
        metrics: Arc<PollMetrics>,
    ) -> Self {
        Self {
            source,
            settings,
            registry,
            metrics,
            tracker: DeltaTracker::new(),
            failures: HashMap::new(),
            cycle: 0,
        }
    }

    #[must_use]
    pub fn tracker(&self) -> &DeltaTracker {
        &self.tracker
    }

    /// Poll until `cancel` fires. A cycle in flight when it fires is dropped
    /// at its current await point, before it can publish.
    pub async fn run(mut self, cancel: CancellationToken) {
        let period = self.settings.interval;
        let mut ticker = interval(period);
        // An overrunning cycle is followed immediately by the next one, and
        // the schedule shifts rather than bursting to catch up.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            every_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
            top_n = self.settings.top_n,
            spread_mode = ?self.settings.spread_mode,
            "poll loop started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!(cycle = self.cycle, "stop requested, abandoning in-flight cycle");
                    break;
                }
                outcome = self.run_cycle() => outcome,
            };
            let elapsed = started.elapsed();
            self.metrics.cycle_duration.record(elapsed);

            if let CycleOutcome::Published { cycle, series } = outcome {
                debug!(cycle, series, elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX), "cycle published");
            }
            if elapsed > period {
                self.metrics.overruns.fetch_add(1, Relaxed);
                warn!(
                    cycle = self.cycle,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    interval_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
                    "poll cycle overran its interval"
                );
            }
        }

        info!(cycles = self.cycle, "poll loop stopped");
    }

    /// Run one fetch → compute → publish cycle.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycle += 1;
        let cycle = self.cycle;

        let tickers = match self.source.fetch_tickers().await {
            Ok(t) => t,
            Err(e) => {
                self.metrics.record_fetch_error(&e);
                self.metrics.cycle_failures.fetch_add(1, Relaxed);
                log_fetch_error(&e, cycle, None, "ticker fetch failed, keeping previous snapshot");
                return CycleOutcome::Abandoned { cycle, error: e };
            }
        };

        let s = &self.settings;
        let volume_leaders = top_symbols(&tickers, &s.volume_quote, SortKey::QuoteVolume, s.top_n);
        let trade_leaders = top_symbols(&tickers, &s.trades_quote, SortKey::TradeCount, s.top_n);
        debug!(cycle, tickers = tickers.len(), ?volume_leaders, ?trade_leaders, "ranked");

        let live = live_keys(&volume_leaders, &trade_leaders);
        let pruned = self.tracker.prune(&live);
        self.failures
            .retain(|sym, _| volume_leaders.contains(sym) || trade_leaders.contains(sym));
        if pruned > 0 {
            debug!(cycle, pruned, "dropped delta baselines of symbols no longer ranked");
        }

        // Start from the previous values of keys that are still live; every
        // symbol that updates below overwrites its own entries.
        let previous = self.registry.read_all();
        let mut values: BTreeMap<MetricKey, SymbolMetricValue> = previous
            .values
            .iter()
            .filter(|(k, _)| live.contains(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let jobs = self.book_jobs(&volume_leaders, &trade_leaders);
        let books = join_all(
            jobs.iter()
                .map(|job| self.source.fetch_order_book(&job.symbol, job.depth)),
        )
        .await;

        for (job, result) in jobs.iter().zip(books) {
            let book = match result {
                Ok(book) => {
                    self.mark_success(&job.symbol);
                    book
                }
                Err(e) => {
                    self.metrics.record_fetch_error(&e);
                    self.mark_failure(&job.symbol, &e, cycle);
                    continue;
                }
            };

            let now = Utc::now();
            let mut put = |metric: MetricKind, value: f64| {
                let v = SymbolMetricValue {
                    symbol: job.symbol.clone(),
                    metric,
                    value,
                    observed_at: now,
                };
                values.insert(v.key(), v);
            };

            if job.notional {
                let t = totals(&book, self.settings.notional_depth);
                put(MetricKind::NotionalBids, t.bids);
                put(MetricKind::NotionalAsks, t.asks);
            }

            if job.spread {
                match self.settings.spread_mode.compute(&book, self.settings.spread_depth) {
                    Ok(spread) => {
                        let key = MetricKey::new(job.symbol.clone(), MetricKind::PriceSpread);
                        let obs = self.tracker.observe(key, spread);
                        if obs.first {
                            debug!(cycle, symbol = %job.symbol, spread, "first spread observation");
                        }
                        put(MetricKind::PriceSpread, spread);
                        put(MetricKind::AbsDelta, obs.delta);
                    }
                    Err(e) => {
                        self.metrics.empty_books.fetch_add(1, Relaxed);
                        warn!(
                            cycle,
                            symbol = %job.symbol,
                            side = %e.side,
                            "empty order book side, keeping last published spread"
                        );
                    }
                }
            }
        }

        let degraded = self
            .failures
            .values()
            .filter(|&&n| n >= self.settings.degraded_after)
            .count();
        self.metrics
            .degraded_symbols
            .store(u64::try_from(degraded).unwrap_or(u64::MAX), Relaxed);

        let series = values.len();
        self.registry.publish(MetricsSnapshot {
            cycle,
            published_at: Some(Utc::now()),
            values,
        });
        self.metrics.cycles.fetch_add(1, Relaxed);
        CycleOutcome::Published { cycle, series }
    }

    /// One fetch per distinct symbol, deep enough for every metric it feeds.
    fn book_jobs(&self, volume_leaders: &[String], trade_leaders: &[String]) -> Vec<BookJob> {
        let mut jobs: Vec<BookJob> = Vec::with_capacity(volume_leaders.len() + trade_leaders.len());
        for symbol in volume_leaders {
            jobs.push(BookJob {
                symbol: symbol.clone(),
                depth: self.settings.notional_depth,
                notional: true,
                spread: false,
            });
        }
        for symbol in trade_leaders {
            if let Some(job) = jobs.iter_mut().find(|j| &j.symbol == symbol) {
                job.depth = job.depth.max(self.settings.spread_depth);
                job.spread = true;
            } else {
                jobs.push(BookJob {
                    symbol: symbol.clone(),
                    depth: self.settings.spread_depth,
                    notional: false,
                    spread: true,
                });
            }
        }
        jobs
    }

    fn mark_success(&mut self, symbol: &str) {
        if let Some(n) = self.failures.remove(symbol)
            && n >= self.settings.degraded_after
        {
            info!(symbol, failures = n, "symbol recovered");
        }
    }

    fn mark_failure(&mut self, symbol: &str, err: &FetchError, cycle: u64) {
        let n = self.failures.entry(symbol.to_owned()).or_insert(0);
        *n += 1;
        log_fetch_error(err, cycle, Some(symbol), "order book fetch failed, keeping last published values");
        if *n == self.settings.degraded_after {
            warn!(
                symbol,
                consecutive_failures = *n,
                event = "SymbolDegraded",
                "symbol degraded, still retried every cycle"
            );
        }
    }
}

/// Every key the cycle may publish, given this cycle's rankings.
fn live_keys(volume_leaders: &[String], trade_leaders: &[String]) -> HashSet<MetricKey> {
    let notional = volume_leaders.iter().flat_map(|s| {
        [MetricKind::NotionalBids, MetricKind::NotionalAsks]
            .map(|m| MetricKey::new(s.clone(), m))
    });
    let spread = trade_leaders.iter().flat_map(|s| {
        [MetricKind::PriceSpread, MetricKind::AbsDelta].map(|m| MetricKey::new(s.clone(), m))
    });
    notional.chain(spread).collect()
}

/// Protocol errors may mean the API contract changed, so they log louder.
fn log_fetch_error(err: &FetchError, cycle: u64, symbol: Option<&str>, msg: &str) {
    let symbol = symbol.unwrap_or("-");
    match err {
        FetchError::Network { endpoint, reason } => {
            warn!(cycle, symbol, endpoint = %endpoint, error = %reason, "{msg}");
        }
        FetchError::Protocol { endpoint, reason } => {
            error!(cycle, symbol, endpoint = %endpoint, error = %reason, "{msg}");
        }
        FetchError::InvalidRequest(reason) => {
            error!(cycle, symbol, error = %reason, "{msg}");
        }
    }
}
