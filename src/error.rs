//! Unified error types for the spread exporter.

use thiserror::Error;

use crate::types::BookSide;

/// Failure of a single market-data round trip. Never retried by the fetcher;
/// the poll loop retries on its next cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Transport failure or timeout.
    #[error("network error on {endpoint}: {reason}")]
    Network { endpoint: String, reason: String },

    /// Non-success status, or a payload that does not have the expected shape.
    #[error("protocol error on {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },

    /// Rejected before any request was sent.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    pub(crate) fn network(endpoint: &str, reason: impl ToString) -> Self {
        Self::Network {
            endpoint: endpoint.to_owned(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn protocol(endpoint: &str, reason: impl ToString) -> Self {
        Self::Protocol {
            endpoint: endpoint.to_owned(),
            reason: reason.to_string(),
        }
    }

    /// Short label used for the `kind` label of the fetch error counter.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Protocol { .. } => "protocol",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// One side of the order book had no levels, so no spread exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("order book has no {side}")]
pub struct EmptyBookError {
    pub side: BookSide,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} = {value} exceeds the feed maximum of {max}")]
    TooLarge {
        field: &'static str,
        value: usize,
        max: usize,
    },

    #[error("quote asset for {field} must not be empty")]
    EmptyQuote { field: &'static str },
}

/// Startup failures. Once the poll loop is running nothing surfaces here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

pub type Result<T> = std::result::Result<T, Error>;
