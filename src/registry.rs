//! Latest-value store for published metric snapshots.
//!
//! Backed by a `tokio::sync::watch` channel holding an `Arc<MetricsSnapshot>`.
//! A publish swaps the whole `Arc`, so a reader holds either the previous
//! snapshot or the new one, never a mix of the two.

use std::sync::Arc;

use tokio::sync::watch;

use crate::types::MetricsSnapshot;

/// Shared through an `Arc`. The poll loop is the only caller of
/// [`publish`](Self::publish); scrape handlers call [`read_all`](Self::read_all).
#[derive(Debug)]
pub struct MetricsRegistry {
    tx: watch::Sender<Arc<MetricsSnapshot>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(MetricsSnapshot::default()));
        Self { tx }
    }

    /// Replace the exposed snapshot.
    pub fn publish(&self, snapshot: MetricsSnapshot) {
        // `send_replace` succeeds with or without live receivers.
        self.tx.send_replace(Arc::new(snapshot));
    }

    /// The currently exposed snapshot.
    #[must_use]
    pub fn read_all(&self) -> Arc<MetricsSnapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// Receiver notified on every publish.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<MetricsSnapshot>> {
        self.tx.subscribe()
    }
}
