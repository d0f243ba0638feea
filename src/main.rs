use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use spread_exporter::config::{Command, Config};
use spread_exporter::error::Result;
use spread_exporter::metrics::{self, HttpState, PollMetrics};
use spread_exporter::poller::Poller;
use spread_exporter::registry::MetricsRegistry;
use spread_exporter::report::Report;
use spread_exporter::source::binance::Binance;

/// `/health` reports STALE once the last publish is this many intervals old.
const STALE_INTERVALS: u32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let source = Binance::new(&config.base_url, config.fetch_timeout())?;
    let settings = config.poll_settings();

    if config.command() == Command::Report {
        let report = Report::collect(&source, &settings).await?;
        print!("{report}");
        return Ok(());
    }

    info!(
        base_url = source.base_url(),
        interval_secs = config.interval_secs,
        top_n = config.top_n,
        listen = %config.listen,
        "starting spread exporter"
    );

    // Bind eagerly so a taken port fails before any task is spawned.
    let listener = tokio::net::TcpListener::bind(config.listen).await?;

    let cancel = CancellationToken::new();
    let registry = Arc::new(MetricsRegistry::new());
    let poll_metrics = Arc::new(PollMetrics::default());

    let poller_handle = {
        let poller = Poller::new(
            source,
            settings,
            Arc::clone(&registry),
            Arc::clone(&poll_metrics),
        );
        tokio::spawn(poller.run(cancel.clone()))
    };

    let http_handle = {
        let state = HttpState {
            registry,
            metrics: poll_metrics,
            stale_after: config.interval() * STALE_INTERVALS,
        };
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve_http(listener, state, cancel.clone()).await {
                error!(error = %e, "metrics server failed");
                cancel.cancel();
            }
        })
    };

    // Shutdown signal handler (SIGINT + SIGTERM).
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("received shutdown signal, draining");
            cancel.cancel();
        });
    }

    let (poller_res, http_res) = tokio::join!(poller_handle, http_handle);
    for (task, res) in [("poller", poller_res), ("http", http_res)] {
        if let Err(e) = res {
            error!(task, error = %e, "task ended abnormally");
        }
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                error!(error = %e, "failed to register SIGTERM handler, waiting for ctrl+c only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
