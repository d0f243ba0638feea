//! End-to-end: mock REST feed → Binance adapter → poller → registry → `/metrics` scrape.

#![allow(clippy::float_cmp)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use spread_exporter::error::FetchError;
use spread_exporter::metrics::{self, HttpState, PollMetrics};
use spread_exporter::poller::{CycleOutcome, PollSettings, Poller};
use spread_exporter::registry::MetricsRegistry;
use spread_exporter::source::MarketData;
use spread_exporter::source::binance::Binance;
use spread_exporter::types::MetricKind;

const TICKERS: &str = r#"[
    {"symbol":"ETHBTC","volume":"50.0","quoteVolume":"10.0","count":5},
    {"symbol":"LTCBTC","volume":"80.0","quoteVolume":"20.0","count":3},
    {"symbol":"BTCUSDT","volume":"100.0","quoteVolume":"500.0","count":10},
    {"symbol":"ETHUSDT","volume":"90.0","quoteVolume":"400.0","count":40}
]"#;

/// Depth bodies served per symbol; each request pops the front until one is left.
#[derive(Clone, Default)]
struct Feed {
    tickers_status: Arc<Mutex<StatusCode>>,
    depth: Arc<Mutex<HashMap<String, Vec<String>>>>,
    depth_limits: Arc<Mutex<Vec<(String, String)>>>,
}

impl Feed {
    fn push_depth(&self, symbol: &str, body: &str) {
        self.depth
            .lock()
            .unwrap()
            .entry(symbol.to_owned())
            .or_default()
            .push(body.to_owned());
    }
}

async fn tickers(State(feed): State<Feed>) -> (StatusCode, &'static str) {
    let status = *feed.tickers_status.lock().unwrap();
    if status.is_success() {
        (status, TICKERS)
    } else {
        (status, "{\"code\":-1003,\"msg\":\"Too many requests\"}")
    }
}

async fn depth(
    State(feed): State<Feed>,
    Query(q): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let symbol = q.get("symbol").cloned().unwrap_or_default();
    let limit = q.get("limit").cloned().unwrap_or_default();
    feed.depth_limits.lock().unwrap().push((symbol.clone(), limit));
    let mut depth = feed.depth.lock().unwrap();
    match depth.get_mut(&symbol) {
        Some(bodies) if bodies.len() > 1 => (StatusCode::OK, bodies.remove(0)),
        Some(bodies) => (StatusCode::OK, bodies[0].clone()),
        None => (
            StatusCode::BAD_REQUEST,
            "{\"code\":-1121,\"msg\":\"Invalid symbol.\"}".to_owned(),
        ),
    }
}

async fn spawn_feed(feed: Feed, cancel: CancellationToken) -> String {
    let app = Router::new()
        .route("/api/v3/ticker/24hr", get(tickers))
        .route("/api/v3/depth", get(depth))
        .with_state(feed);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .unwrap();
    });
    format!("http://{addr}/")
}

fn depth_body(bid: f64, ask: f64) -> String {
    format!(r#"{{"lastUpdateId":1,"bids":[["{bid}","2.0"],["{}","1.0"]],"asks":[["{ask}","3.0"],["{}","1.0"]]}}"#, bid - 1.0, ask + 1.0)
}

fn gauge(text: &str, name: &str) -> Option<f64> {
    text.lines()
        .find(|l| l.starts_with(name) && l.as_bytes().get(name.len()) == Some(&b'{'))
        .and_then(|l| l.rsplit(' ').next())
        .and_then(|v| v.parse().ok())
}

#[tokio::test]
async fn adapter_decodes_live_payloads() {
    let cancel = CancellationToken::new();
    let feed = Feed::default();
    *feed.tickers_status.lock().unwrap() = StatusCode::OK;
    feed.push_depth("LTCBTC", &depth_body(100.0, 101.0));
    let base = spawn_feed(feed.clone(), cancel.clone()).await;

    let source = Binance::new(&base, Duration::from_secs(5)).unwrap();
    assert!(!source.base_url().ends_with('/'));

    let tickers = source.fetch_tickers().await.unwrap();
    assert_eq!(tickers.len(), 4);
    assert_eq!(tickers[3].trade_count, 40);

    let book = source.fetch_order_book("LTCBTC", 200).await.unwrap();
    assert_eq!(book.bids[0].price, 100.0);
    assert_eq!(book.asks.len(), 2);
    assert_eq!(
        feed.depth_limits.lock().unwrap().as_slice(),
        [("LTCBTC".to_owned(), "200".to_owned())]
    );

    let err = source.fetch_order_book("NOPE", 100).await.unwrap_err();
    assert!(matches!(&err, FetchError::Protocol { reason, .. } if reason.contains("400")));

    let err = source.fetch_order_book("LTCBTC", 0).await.unwrap_err();
    assert!(matches!(err, FetchError::InvalidRequest(_)));

    *feed.tickers_status.lock().unwrap() = StatusCode::TOO_MANY_REQUESTS;
    let err = source.fetch_tickers().await.unwrap_err();
    assert_eq!(err.kind(), "protocol");

    cancel.cancel();
}

#[tokio::test]
async fn unreachable_feed_is_a_network_error() {
    // Bind then drop, so nothing listens on the port.
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let source = Binance::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
    let err = source.fetch_tickers().await.unwrap_err();
    assert_eq!(err.kind(), "network");
}

#[tokio::test]
async fn slow_feed_times_out_as_network_error() {
    let cancel = CancellationToken::new();
    let app = Router::new().route(
        "/api/v3/ticker/24hr",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            "[]"
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
                .unwrap();
        }
    });

    let source = Binance::new(&format!("http://{addr}"), Duration::from_millis(200)).unwrap();
    let err = source.fetch_tickers().await.unwrap_err();
    assert_eq!(err.kind(), "network");
    assert!(err.to_string().contains("timed out"), "{err}");

    cancel.cancel();
}

#[tokio::test]
async fn scrape_exposes_published_gauges() {
    let cancel = CancellationToken::new();
    let feed = Feed::default();
    *feed.tickers_status.lock().unwrap() = StatusCode::OK;
    feed.push_depth("LTCBTC", &depth_body(100.0, 101.0));
    feed.push_depth("ETHBTC", &depth_body(10.0, 11.0));
    feed.push_depth("ETHUSDT", &depth_body(50.0, 51.0));
    feed.push_depth("ETHUSDT", &depth_body(50.0, 52.5));
    feed.push_depth("BTCUSDT", &depth_body(1000.0, 1002.0));
    let base = spawn_feed(feed.clone(), cancel.clone()).await;

    let registry = Arc::new(MetricsRegistry::new());
    let poll_metrics = Arc::new(PollMetrics::default());
    let mut poller = Poller::new(
        Binance::new(&base, Duration::from_secs(5)).unwrap(),
        PollSettings {
            top_n: 2,
            ..PollSettings::default()
        },
        Arc::clone(&registry),
        Arc::clone(&poll_metrics),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = HttpState {
        registry: Arc::clone(&registry),
        metrics: Arc::clone(&poll_metrics),
        stale_after: Duration::from_secs(30),
    };
    let server = tokio::spawn(metrics::serve_http(listener, state, cancel.clone()));
    let client = reqwest::Client::new();

    let health = client.get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    assert_eq!(
        poller.run_cycle().await,
        CycleOutcome::Published { cycle: 1, series: 8 }
    );
    assert_eq!(
        poller.run_cycle().await,
        CycleOutcome::Published { cycle: 2, series: 8 }
    );

    let resp = client.get(format!("http://{addr}/metrics")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/plain; version=0.0.4")
    );
    let text = resp.text().await.unwrap();

    // Range spread: max ask - min bid over the fetched levels.
    assert_eq!(gauge(&text, "ETHUSDT_price_spread_gauge"), Some(4.5));
    assert_eq!(gauge(&text, "ETHUSDT_abs_delta_gauge"), Some(1.5));
    assert_eq!(gauge(&text, "BTCUSDT_price_spread_gauge"), Some(4.0));
    assert_eq!(gauge(&text, "BTCUSDT_abs_delta_gauge"), Some(0.0));
    assert_eq!(gauge(&text, "LTCBTC_notional_bids_gauge"), Some(299.0));
    assert_eq!(gauge(&text, "LTCBTC_notional_asks_gauge"), Some(405.0));
    assert!(text.contains("spread_exporter_cycles_total 2"));
    assert_eq!(registry.read_all().get("ETHBTC", MetricKind::NotionalBids), Some(29.0));

    let health = client.get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "OK\n");

    // Feed starts rejecting the ticker snapshot: previous values stay exposed.
    *feed.tickers_status.lock().unwrap() = StatusCode::TOO_MANY_REQUESTS;
    assert!(matches!(
        poller.run_cycle().await,
        CycleOutcome::Abandoned { cycle: 3, .. }
    ));
    let text = client
        .get(format!("http://{addr}/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(gauge(&text, "ETHUSDT_price_spread_gauge"), Some(4.5));
    assert!(text.contains("spread_exporter_fetch_errors_total{kind=\"protocol\"} 1"));

    cancel.cancel();
    server.await.unwrap().unwrap();
}
