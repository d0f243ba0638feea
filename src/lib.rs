//! Spread exporter library.
//!
//! Polls the Binance REST API on a fixed interval, ranks symbols by quote
//! volume and trade count, computes order book notional totals, spreads and
//! spread deltas, and exposes the latest values as Prometheus gauges.

pub mod aggregator;
pub mod config;
pub mod delta;
pub mod error;
pub mod metrics;
pub mod poller;
pub mod ranking;
pub mod registry;
pub mod report;
pub mod source;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;
