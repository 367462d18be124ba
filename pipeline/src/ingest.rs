//! Concurrent fan-out over the four upstream sources and the merge that
//! produces a snapshot.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

use crate::cache::Clock;
use crate::errors::{FetchError, IngestError};
use crate::fetcher::SourceFetcher;
use crate::metrics_defs::{REFRESH_DURATION, REFRESH_RECORDS, SOURCE_FETCH_FAILURES};
use crate::types::{RecordKey, Snapshot, SourceFilter, SourceKey};
use crate::{counter, histogram};

/// The seam the cache refreshes through.
#[async_trait]
pub trait Ingest: Send + Sync {
    async fn refresh(&self) -> Result<Snapshot, IngestError>;
}

/// Runs all source fetchers concurrently and merges their output into one
/// snapshot.
///
/// Records are deduplicated by `(origin, filter, id)` across every result
/// *before* any counting happens, so the merged totals can never disagree
/// with per-source sums. A failed source is recorded in the snapshot's error
/// map and the remaining sources still contribute; only a refresh on which
/// every source fails produces an error.
pub struct ParallelIngestor {
    fetchers: Vec<Arc<SourceFetcher>>,
    clock: Arc<dyn Clock>,
}

impl ParallelIngestor {
    pub fn new(fetchers: Vec<Arc<SourceFetcher>>, clock: Arc<dyn Clock>) -> Self {
        ParallelIngestor { fetchers, clock }
    }
}

#[async_trait]
impl Ingest for ParallelIngestor {
    async fn refresh(&self) -> Result<Snapshot, IngestError> {
        let started = Instant::now();

        let mut join_set = JoinSet::new();
        // Maps task ids to their source, so a panicked task can still be
        // attributed to the source it was draining.
        let mut task_sources: HashMap<tokio::task::Id, SourceKey> = HashMap::new();

        for fetcher in &self.fetchers {
            let fetcher = Arc::clone(fetcher);
            let key = fetcher.key();
            let handle = join_set.spawn(async move { (key, fetcher.drain().await) });
            task_sources.insert(handle.id(), key);
        }

        let mut seen: HashSet<RecordKey> = HashSet::new();
        let mut degrade_records = Vec::new();
        let mut resolved_records = Vec::new();
        let mut source_errors: BTreeMap<SourceKey, FetchError> = BTreeMap::new();

        while let Some(joined) = join_set.join_next_with_id().await {
            match joined {
                Ok((task_id, (key, Ok(batch)))) => {
                    task_sources.remove(&task_id);
                    tracing::debug!(source = %key, records = batch.len(), "source drained");
                    for record in batch {
                        if !seen.insert(record.key()) {
                            continue;
                        }
                        match record.source_filter {
                            SourceFilter::Degrade => degrade_records.push(record),
                            SourceFilter::Resolved => resolved_records.push(record),
                        }
                    }
                }
                Ok((task_id, (key, Err(err)))) => {
                    task_sources.remove(&task_id);
                    counter!(SOURCE_FETCH_FAILURES).increment(1);
                    tracing::error!(
                        source = %key,
                        error = %err,
                        "source fetch failed, continuing with remaining sources"
                    );
                    source_errors.insert(key, err);
                }
                Err(join_err) => {
                    // A panicked fetch task counts as a failure for its source,
                    // not for the whole refresh.
                    if let Some(key) = task_sources.remove(&join_err.id()) {
                        counter!(SOURCE_FETCH_FAILURES).increment(1);
                        tracing::error!(source = %key, error = %join_err, "fetch task aborted");
                        source_errors.insert(key, FetchError::Transport(join_err.to_string()));
                    }
                }
            }
        }

        if !self.fetchers.is_empty() && source_errors.len() == self.fetchers.len() {
            return Err(IngestError::AllSourcesFailed {
                errors: source_errors,
            });
        }

        histogram!(REFRESH_DURATION).record(started.elapsed().as_secs_f64());
        histogram!(REFRESH_RECORDS)
            .record((degrade_records.len() + resolved_records.len()) as f64);

        Ok(Snapshot {
            degrade_records,
            resolved_records,
            fetched_at: self.clock.now(),
            source_errors,
        })
    }
}
