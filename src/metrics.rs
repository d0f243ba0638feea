//! Prometheus text exposition and health endpoint.
//!
//! `/metrics` renders the latest published [`MetricsSnapshot`] as per-symbol
//! gauges followed by the exporter's own counters and cycle-duration
//! histogram. No external metrics crate: atomics rendered directly as
//! Prometheus text format.

use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::Utc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::FetchError;
use crate::registry::MetricsRegistry;
use crate::types::{MetricKind, MetricsSnapshot, SymbolMetricValue};

/// Exposition format content type.
const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// ---------------------------------------------------------------------------
// Prometheus histogram with millisecond-to-minute buckets
// ---------------------------------------------------------------------------

const NUM_BUCKETS: usize = 12;

/// Upper bounds in milliseconds + Prometheus `le` label strings.
/// Cycles are a handful of HTTP round trips, so 10ms to 60s.
const BUCKETS: [(u64, &str); NUM_BUCKETS] = [
    (10, "0.01"),
    (25, "0.025"),
    (50, "0.05"),
    (100, "0.1"),
    (250, "0.25"),
    (500, "0.5"),
    (1_000, "1"),
    (2_500, "2.5"),
    (5_000, "5"),
    (10_000, "10"),
    (30_000, "30"),
    (60_000, "60"),
];

pub struct PromHistogram {
    /// Cumulative bucket counters. Index i counts observations <= BUCKETS[i].
    buckets: [AtomicU64; NUM_BUCKETS],
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl Default for PromHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl PromHistogram {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            sum_ms: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record a duration observation. Increments all cumulative buckets
    /// whose upper bound >= the observed value.
    pub fn record(&self, duration: Duration) {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);

        if let Some(i) = BUCKETS.iter().position(|&(bound, _)| ms <= bound) {
            for bucket in &self.buckets[i..] {
                bucket.fetch_add(1, Relaxed);
            }
        }

        self.sum_ms.fetch_add(ms, Relaxed);
        self.count.fetch_add(1, Relaxed);
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Relaxed)
    }

    #[allow(clippy::cast_precision_loss)]
    fn render(&self, name: &str, out: &mut String) -> fmt::Result {
        for (i, &(_, le)) in BUCKETS.iter().enumerate() {
            writeln!(out, "{name}_bucket{{le=\"{le}\"}} {}", self.buckets[i].load(Relaxed))?;
        }
        let total = self.count.load(Relaxed);
        writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {total}")?;
        writeln!(out, "{name}_sum {}", self.sum_ms.load(Relaxed) as f64 / 1_000.0)?;
        writeln!(out, "{name}_count {total}")
    }
}

// ---------------------------------------------------------------------------
// Exporter self-metrics
// ---------------------------------------------------------------------------

/// Operational counters of the poll loop. Written by the poll task only.
pub struct PollMetrics {
    /// Cycles that ended in a publish.
    pub cycles: AtomicU64,
    /// Cycles abandoned because the ticker snapshot could not be fetched.
    pub cycle_failures: AtomicU64,
    pub network_errors: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub invalid_requests: AtomicU64,
    pub empty_books: AtomicU64,
    /// Cycles whose work took longer than the poll interval.
    pub overruns: AtomicU64,
    pub degraded_symbols: AtomicU64,
    start_time: Instant,
    pub cycle_duration: PromHistogram,
}

impl Default for PollMetrics {
    fn default() -> Self {
        Self {
            cycles: AtomicU64::new(0),
            cycle_failures: AtomicU64::new(0),
            network_errors: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            invalid_requests: AtomicU64::new(0),
            empty_books: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            degraded_symbols: AtomicU64::new(0),
            start_time: Instant::now(),
            cycle_duration: PromHistogram::new(),
        }
    }
}

impl PollMetrics {
    pub fn record_fetch_error(&self, err: &FetchError) {
        let counter = match err {
            FetchError::Network { .. } => &self.network_errors,
            FetchError::Protocol { .. } => &self.protocol_errors,
            FetchError::InvalidRequest(_) => &self.invalid_requests,
        };
        counter.fetch_add(1, Relaxed);
    }

    fn render(&self, snapshot: &MetricsSnapshot, out: &mut String) -> fmt::Result {
        writeln!(out, "# HELP spread_exporter_cycles_total Poll cycles that published a snapshot")?;
        writeln!(out, "# TYPE spread_exporter_cycles_total counter")?;
        writeln!(out, "spread_exporter_cycles_total {}", self.cycles.load(Relaxed))?;

        writeln!(out, "# HELP spread_exporter_cycle_failures_total Poll cycles abandoned on ticker fetch failure")?;
        writeln!(out, "# TYPE spread_exporter_cycle_failures_total counter")?;
        writeln!(out, "spread_exporter_cycle_failures_total {}", self.cycle_failures.load(Relaxed))?;

        writeln!(out, "# HELP spread_exporter_fetch_errors_total Market-data fetch failures by kind")?;
        writeln!(out, "# TYPE spread_exporter_fetch_errors_total counter")?;
        writeln!(out, "spread_exporter_fetch_errors_total{{kind=\"network\"}} {}", self.network_errors.load(Relaxed))?;
        writeln!(out, "spread_exporter_fetch_errors_total{{kind=\"protocol\"}} {}", self.protocol_errors.load(Relaxed))?;
        writeln!(out, "spread_exporter_fetch_errors_total{{kind=\"invalid_request\"}} {}", self.invalid_requests.load(Relaxed))?;

        writeln!(out, "# HELP spread_exporter_empty_books_total Order books with an empty side")?;
        writeln!(out, "# TYPE spread_exporter_empty_books_total counter")?;
        writeln!(out, "spread_exporter_empty_books_total {}", self.empty_books.load(Relaxed))?;

        writeln!(out, "# HELP spread_exporter_overruns_total Poll cycles that took longer than the interval")?;
        writeln!(out, "# TYPE spread_exporter_overruns_total counter")?;
        writeln!(out, "spread_exporter_overruns_total {}", self.overruns.load(Relaxed))?;

        writeln!(out, "# HELP spread_exporter_degraded_symbols Symbols with repeated consecutive fetch failures")?;
        writeln!(out, "# TYPE spread_exporter_degraded_symbols gauge")?;
        writeln!(out, "spread_exporter_degraded_symbols {}", self.degraded_symbols.load(Relaxed))?;

        writeln!(out, "# HELP spread_exporter_tracked_series Per-symbol series in the published snapshot")?;
        writeln!(out, "# TYPE spread_exporter_tracked_series gauge")?;
        writeln!(out, "spread_exporter_tracked_series {}", snapshot.values.len())?;

        writeln!(out, "# HELP spread_exporter_uptime_seconds Seconds since process start")?;
        writeln!(out, "# TYPE spread_exporter_uptime_seconds gauge")?;
        writeln!(out, "spread_exporter_uptime_seconds {}", self.start_time.elapsed().as_secs())?;

        if let Some(at) = snapshot.published_at {
            #[allow(clippy::cast_precision_loss)]
            let secs = at.timestamp_millis() as f64 / 1_000.0;
            writeln!(out, "# HELP spread_exporter_last_publish_timestamp_seconds Unix time of the last published snapshot")?;
            writeln!(out, "# TYPE spread_exporter_last_publish_timestamp_seconds gauge")?;
            writeln!(out, "spread_exporter_last_publish_timestamp_seconds {secs}")?;
        }

        writeln!(out, "# HELP spread_exporter_cycle_duration_seconds Poll cycle duration, fetch to publish")?;
        writeln!(out, "# TYPE spread_exporter_cycle_duration_seconds histogram")?;
        self.cycle_duration.render("spread_exporter_cycle_duration_seconds", out)
    }
}

// ---------------------------------------------------------------------------
// Per-symbol gauges
// ---------------------------------------------------------------------------

/// `<symbol>_<metric>_gauge`, restricted to `[a-zA-Z_:][a-zA-Z0-9_:]*`.
#[must_use]
pub fn metric_name(symbol: &str, metric: MetricKind) -> String {
    let mut name = String::with_capacity(symbol.len() + 24);
    if symbol.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        name.push('_');
    }
    name.extend(
        symbol
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' }),
    );
    name.push('_');
    name.push_str(metric.as_str());
    name.push_str("_gauge");
    name
}

/// Escape a label value: backslash, double quote and newline.
fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// One family per sanitized name. Symbols that sanitize to the same name
/// (`BTC-USD`, `BTC_USD`) share it and differ only in their `symbol` label.
fn render_snapshot(snapshot: &MetricsSnapshot, out: &mut String) -> fmt::Result {
    let mut families: BTreeMap<String, Vec<&SymbolMetricValue>> = BTreeMap::new();
    for v in snapshot.values.values() {
        families.entry(metric_name(&v.symbol, v.metric)).or_default().push(v);
    }
    for (name, series) in &families {
        let first = series[0];
        writeln!(out, "# HELP {name} {} {}", escape_label(&first.symbol), first.metric.help())?;
        writeln!(out, "# TYPE {name} gauge")?;
        for v in series {
            writeln!(out, "{name}{{symbol=\"{}\"}} {}", escape_label(&v.symbol), v.value)?;
        }
    }
    Ok(())
}

/// Render the whole `/metrics` body.
#[must_use]
pub fn to_prometheus(snapshot: &MetricsSnapshot, metrics: &PollMetrics) -> String {
    let mut out = String::with_capacity(256 * (snapshot.values.len() + 16));
    // Writing into a String cannot fail.
    let _ = render_snapshot(snapshot, &mut out).and_then(|()| metrics.render(snapshot, &mut out));
    out
}

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct HttpState {
    pub registry: Arc<MetricsRegistry>,
    pub metrics: Arc<PollMetrics>,
    /// A snapshot older than this reports `STALE` on `/health`.
    pub stale_after: Duration,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prom_metrics))
        .with_state(state)
}

/// Serve `/health` and `/metrics` on a pre-bound listener until `cancel` fires.
pub async fn serve_http(
    listener: TcpListener,
    state: HttpState,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "metrics/health HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}

async fn health(State(s): State<HttpState>) -> (StatusCode, &'static str) {
    let snapshot = s.registry.read_all();
    let Some(at) = snapshot.published_at else {
        return (StatusCode::SERVICE_UNAVAILABLE, "STARTING\n");
    };
    let age = (Utc::now() - at).to_std().unwrap_or_default();
    if age > s.stale_after {
        (StatusCode::OK, "STALE\n")
    } else {
        (StatusCode::OK, "OK\n")
    }
}

async fn prom_metrics(State(s): State<HttpState>) -> impl IntoResponse {
    let snapshot = s.registry.read_all();
    (
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        to_prometheus(&snapshot, &s.metrics),
    )
}
