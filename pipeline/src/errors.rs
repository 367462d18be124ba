use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::SourceKey;

/// Failure of a single source fetch, classified for retry handling.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Auth rejections never resolve on their own; everything else may.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, FetchError::Auth(_))
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "transport",
            FetchError::Auth(_) => "auth",
            FetchError::Malformed(_) => "malformed",
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::Malformed(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// A refresh on which every source failed. Partial failures are not errors:
/// they produce a snapshot that carries the per-source error map instead.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("all sources failed, no snapshot produced")]
    AllSourcesFailed {
        errors: BTreeMap<SourceKey, FetchError>,
    },
}

/// Errors surfaced by the snapshot cache to its callers.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Every source failed and there is no previously cached snapshot to
    /// fall back on. Fatal to the current query.
    #[error("no data available: {0}")]
    NoData(#[source] IngestError),

    #[error("refresh gate closed: {0}")]
    RefreshGate(#[from] tokio::sync::AcquireError),
}
