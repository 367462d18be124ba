//! Composition root: wires clients, fetchers, ingestor and cache together
//! and exposes the query surface the request layer consumes.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{CacheStatus, Clock, SnapshotCache, SnapshotView, SystemClock};
use crate::client::{ClientError, TrackerClient};
use crate::config::{Config, ValidationError};
use crate::errors::CacheError;
use crate::fetcher::{SourceFetcher, SourceSpec};
use crate::ingest::{Ingest, ParallelIngestor};
use crate::stats::{self, StatsFilter, StatsReport};
use crate::types::{Origin, SourceFilter};

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("client setup failed: {0}")]
    Client(#[from] ClientError),
}

/// A computed report together with the snapshot view it was derived from,
/// so callers can surface staleness and partial-source failures.
pub struct QueryOutcome {
    pub stats: StatsReport,
    pub view: SnapshotView,
}

pub struct DegradeService {
    cache: SnapshotCache,
}

impl DegradeService {
    /// Builds the standard four-source pipeline described by the config.
    pub fn from_config(config: &Config) -> Result<Self, BuildError> {
        config.validate()?;

        let timeout = Duration::from_secs(config.fetch.request_timeout_secs);
        let internal = Arc::new(TrackerClient::new(&config.sites.internal, timeout)?);
        let vendor = Arc::new(TrackerClient::new(&config.sites.vendor, timeout)?);

        let sources = [
            (
                Arc::clone(&internal),
                Origin::Internal,
                SourceFilter::Degrade,
                &config.filters.degrade.internal,
            ),
            (
                Arc::clone(&vendor),
                Origin::Vendor,
                SourceFilter::Degrade,
                &config.filters.degrade.vendor,
            ),
            (
                internal,
                Origin::Internal,
                SourceFilter::Resolved,
                &config.filters.resolved.internal,
            ),
            (
                vendor,
                Origin::Vendor,
                SourceFilter::Resolved,
                &config.filters.resolved.vendor,
            ),
        ];
        let fetchers = sources
            .into_iter()
            .map(|(client, origin, filter, filter_id)| {
                Arc::new(SourceFetcher::new(
                    client,
                    SourceSpec {
                        origin,
                        filter,
                        filter_id: filter_id.clone(),
                    },
                    &config.fetch,
                ))
            })
            .collect();

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ingestor = Arc::new(ParallelIngestor::new(fetchers, Arc::clone(&clock)));
        Ok(Self::with_ingestor(
            ingestor,
            clock,
            Duration::from_secs(config.cache.ttl_secs),
        ))
    }

    /// Assembles a service around an arbitrary ingestor and clock.
    pub fn with_ingestor(
        ingestor: Arc<dyn Ingest>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        DegradeService {
            cache: SnapshotCache::new(ingestor, clock, ttl),
        }
    }

    /// Read path: refreshes only when the cached snapshot is missing or
    /// expired, then computes statistics under the given filter.
    pub async fn query(&self, filter: &StatsFilter) -> Result<QueryOutcome, CacheError> {
        let view = self.cache.get_or_refresh().await?;
        let stats = stats::compute(&view.snapshot, filter);
        Ok(QueryOutcome { stats, view })
    }

    /// Forces a refresh regardless of TTL.
    pub async fn refresh(&self) -> Result<SnapshotView, CacheError> {
        self.cache.force_refresh().await
    }

    pub fn cache_status(&self) -> CacheStatus {
        self.cache.status()
    }
}
