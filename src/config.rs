//! CLI configuration via clap. Every flag can also be set from the
//! environment.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::aggregator::SpreadMode;
use crate::error::ConfigError;
use crate::poller::PollSettings;
use crate::ranking::QuoteAsset;
use crate::source::binance::DEFAULT_BASE_URL;
use crate::types::MAX_DEPTH_LIMIT;

#[derive(Parser, Debug, Clone)]
#[command(name = "spread-exporter", version)]
#[command(about = "Polls Binance market data and exposes spreads and their deltas as Prometheus gauges")]
pub struct Config {
    /// Market-data REST base URL
    #[arg(long, env = "SPREAD_EXPORTER_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Seconds between the starts of two poll cycles
    #[arg(long, env = "SPREAD_EXPORTER_INTERVAL_SECS", default_value_t = 10)]
    pub interval_secs: u64,

    /// Number of symbols kept by each ranking
    #[arg(long, env = "SPREAD_EXPORTER_TOP_N", default_value_t = 5)]
    pub top_n: usize,

    /// Order book levels summed for notional value
    #[arg(long, env = "SPREAD_EXPORTER_NOTIONAL_DEPTH", default_value_t = 200)]
    pub notional_depth: usize,

    /// Order book levels fetched for the spread
    #[arg(long, env = "SPREAD_EXPORTER_SPREAD_DEPTH", default_value_t = 100)]
    pub spread_depth: usize,

    /// Per-request timeout in seconds
    #[arg(long, env = "SPREAD_EXPORTER_FETCH_TIMEOUT_SECS", default_value_t = 10)]
    pub fetch_timeout_secs: u64,

    /// Metrics/health HTTP bind address
    #[arg(short, long, env = "SPREAD_EXPORTER_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Quote asset of the volume ranking (notional gauges)
    #[arg(long, env = "SPREAD_EXPORTER_VOLUME_QUOTE", default_value = "BTC")]
    pub volume_quote: String,

    /// Quote asset of the trade-count ranking (spread gauges)
    #[arg(long, env = "SPREAD_EXPORTER_TRADES_QUOTE", default_value = "USDT")]
    pub trades_quote: String,

    /// Spread definition: `range` is max(ask) - min(bid), `touch` is best ask - best bid
    #[arg(long, env = "SPREAD_EXPORTER_SPREAD_MODE", value_enum, default_value_t = SpreadMode::Range)]
    pub spread_mode: SpreadMode,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Poll continuously and serve /metrics (default)
    Serve,
    /// Fetch once, print the rankings, notional totals and spreads, and exit
    Report,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::Zero { field: "interval_secs" });
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Zero { field: "fetch_timeout_secs" });
        }
        for (field, value) in [
            ("notional_depth", self.notional_depth),
            ("spread_depth", self.spread_depth),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
            if value > MAX_DEPTH_LIMIT {
                return Err(ConfigError::TooLarge {
                    field,
                    value,
                    max: MAX_DEPTH_LIMIT,
                });
            }
        }
        if self.volume_quote.is_empty() {
            return Err(ConfigError::EmptyQuote { field: "volume_quote" });
        }
        if self.trades_quote.is_empty() {
            return Err(ConfigError::EmptyQuote { field: "trades_quote" });
        }
        Ok(())
    }

    #[must_use]
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: self.interval(),
            top_n: self.top_n,
            notional_depth: self.notional_depth,
            spread_depth: self.spread_depth,
            volume_quote: QuoteAsset::new(self.volume_quote.clone()),
            trades_quote: QuoteAsset::new(self.trades_quote.clone()),
            spread_mode: self.spread_mode,
            ..PollSettings::default()
        }
    }
}
