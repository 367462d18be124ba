//! Time-bounded snapshot cache with single-flight refresh.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::counter;
use crate::errors::CacheError;
use crate::ingest::Ingest;
use crate::metrics_defs::{CACHE_HIT, CACHE_MISS, CACHE_STALE_SERVES};
use crate::types::Snapshot;

/// Time source for TTL decisions, injected so cache behavior is
/// deterministic under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Served past its TTL because the refresh that should have replaced it
    /// failed. A warning state, not an error.
    Stale,
}

/// A snapshot handed to a caller, tagged with how current it is.
#[derive(Clone, Debug)]
pub struct SnapshotView {
    pub snapshot: Arc<Snapshot>,
    pub freshness: Freshness,
}

impl SnapshotView {
    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    pub valid: bool,
    pub age_seconds: Option<u64>,
}

/// Holds the latest published snapshot and coordinates refreshes.
///
/// The snapshot pointer is swapped under a write lock held only for the
/// swap, so readers never wait out a refresh unless they need its result.
/// The semaphore admits one refresh at a time; callers that arrive while a
/// refresh is in flight wait on the permit and pick up the published result
/// instead of starting their own.
pub struct SnapshotCache {
    ingestor: Arc<dyn Ingest>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    current: RwLock<Option<Arc<Snapshot>>>,
    last_attempt: RwLock<Option<DateTime<Utc>>>,
    refresh_gate: Semaphore,
}

impl SnapshotCache {
    pub fn new(ingestor: Arc<dyn Ingest>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        SnapshotCache {
            ingestor,
            clock,
            ttl,
            current: RwLock::new(None),
            last_attempt: RwLock::new(None),
            refresh_gate: Semaphore::new(1),
        }
    }

    /// Returns the current snapshot, refreshing first when it is missing or
    /// older than the TTL.
    pub async fn get_or_refresh(&self) -> Result<SnapshotView, CacheError> {
        if let Some(snapshot) = self.fresh() {
            counter!(CACHE_HIT).increment(1);
            return Ok(SnapshotView {
                snapshot,
                freshness: Freshness::Fresh,
            });
        }
        counter!(CACHE_MISS).increment(1);

        let arrived_at = self.clock.now();
        let _permit = self.refresh_gate.acquire().await?;

        // A refresh that completed while we waited on the gate is our result.
        if let Some(snapshot) = self.fresh() {
            return Ok(SnapshotView {
                snapshot,
                freshness: Freshness::Fresh,
            });
        }
        if self.attempted_since(arrived_at)
            && let Some(snapshot) = self.current()
        {
            return Ok(SnapshotView {
                snapshot,
                freshness: Freshness::Stale,
            });
        }

        self.refresh_locked().await
    }

    /// Refreshes regardless of TTL. A refresh already in flight when the call
    /// arrives is folded into it rather than duplicated.
    pub async fn force_refresh(&self) -> Result<SnapshotView, CacheError> {
        let requested_at = self.clock.now();
        let _permit = self.refresh_gate.acquire().await?;

        if self.attempted_since(requested_at)
            && let Some(snapshot) = self.current()
        {
            let freshness = if snapshot.fetched_at >= requested_at {
                Freshness::Fresh
            } else {
                Freshness::Stale
            };
            return Ok(SnapshotView {
                snapshot,
                freshness,
            });
        }

        self.refresh_locked().await
    }

    pub fn status(&self) -> CacheStatus {
        match self.current() {
            Some(snapshot) => {
                let age = self.age(&snapshot);
                CacheStatus {
                    valid: age < self.ttl,
                    age_seconds: Some(age.as_secs()),
                }
            }
            None => CacheStatus {
                valid: false,
                age_seconds: None,
            },
        }
    }

    fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().clone()
    }

    fn fresh(&self) -> Option<Arc<Snapshot>> {
        self.current().filter(|snapshot| self.age(snapshot) < self.ttl)
    }

    // Clock skew can make a snapshot look newer than now; treat that as age
    // zero rather than wrapping.
    fn age(&self, snapshot: &Snapshot) -> Duration {
        (self.clock.now() - snapshot.fetched_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    fn attempted_since(&self, instant: DateTime<Utc>) -> bool {
        self.last_attempt
            .read()
            .is_some_and(|attempted_at| attempted_at >= instant)
    }

    /// Runs one refresh. Must only be called while holding the gate permit.
    async fn refresh_locked(&self) -> Result<SnapshotView, CacheError> {
        *self.last_attempt.write() = Some(self.clock.now());

        match self.ingestor.refresh().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.current.write() = Some(Arc::clone(&snapshot));
                Ok(SnapshotView {
                    snapshot,
                    freshness: Freshness::Fresh,
                })
            }
            Err(err) => match self.current() {
                Some(snapshot) => {
                    counter!(CACHE_STALE_SERVES).increment(1);
                    tracing::warn!(error = %err, "refresh failed, serving stale snapshot");
                    Ok(SnapshotView {
                        snapshot,
                        freshness: Freshness::Stale,
                    })
                }
                None => Err(CacheError::NoData(err)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::IngestError;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(ManualClock {
                now: Mutex::new(Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()),
            })
        }

        fn advance_secs(&self, secs: i64) {
            *self.now.lock() += chrono::Duration::seconds(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }

    struct CountingIngestor {
        clock: Arc<ManualClock>,
        calls: AtomicUsize,
        delay: Duration,
        fail: AtomicBool,
    }

    impl CountingIngestor {
        fn new(clock: Arc<ManualClock>) -> Arc<Self> {
            Self::with_delay(clock, Duration::ZERO)
        }

        fn with_delay(clock: Arc<ManualClock>, delay: Duration) -> Arc<Self> {
            Arc::new(CountingIngestor {
                clock,
                calls: AtomicUsize::new(0),
                delay,
                fail: AtomicBool::new(false),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Ingest for CountingIngestor {
        async fn refresh(&self) -> Result<Snapshot, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(IngestError::AllSourcesFailed {
                    errors: BTreeMap::new(),
                });
            }
            Ok(Snapshot {
                degrade_records: Vec::new(),
                resolved_records: Vec::new(),
                fetched_at: self.clock.now(),
                source_errors: BTreeMap::new(),
            })
        }
    }

    fn cache(
        ingestor: Arc<CountingIngestor>,
        clock: Arc<ManualClock>,
        ttl_secs: u64,
    ) -> Arc<SnapshotCache> {
        Arc::new(SnapshotCache::new(
            ingestor,
            clock,
            Duration::from_secs(ttl_secs),
        ))
    }

    #[tokio::test]
    async fn test_fresh_snapshot_is_reused() {
        let clock = ManualClock::new();
        let ingestor = CountingIngestor::new(Arc::clone(&clock));
        let cache = cache(Arc::clone(&ingestor), Arc::clone(&clock), 3600);

        let first = cache.get_or_refresh().await.unwrap();
        clock.advance_secs(3599);
        let second = cache.get_or_refresh().await.unwrap();

        assert_eq!(ingestor.calls(), 1);
        assert!(Arc::ptr_eq(&first.snapshot, &second.snapshot));
        assert_eq!(second.freshness, Freshness::Fresh);
    }

    #[tokio::test]
    async fn test_expired_snapshot_triggers_refresh() {
        let clock = ManualClock::new();
        let ingestor = CountingIngestor::new(Arc::clone(&clock));
        let cache = cache(Arc::clone(&ingestor), Arc::clone(&clock), 3600);

        let first = cache.get_or_refresh().await.unwrap();
        clock.advance_secs(3600);
        let second = cache.get_or_refresh().await.unwrap();

        assert_eq!(ingestor.calls(), 2);
        assert!(!Arc::ptr_eq(&first.snapshot, &second.snapshot));
    }

    #[tokio::test]
    async fn test_single_flight_under_concurrent_readers() {
        let clock = ManualClock::new();
        let ingestor = CountingIngestor::with_delay(Arc::clone(&clock), Duration::from_millis(50));
        let cache = cache(Arc::clone(&ingestor), Arc::clone(&clock), 3600);

        let mut joins = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            joins.push(tokio::spawn(async move { cache.get_or_refresh().await }));
        }

        let mut views = Vec::new();
        for join in joins {
            views.push(join.await.unwrap().unwrap());
        }

        assert_eq!(ingestor.calls(), 1);
        for view in &views {
            assert!(Arc::ptr_eq(&view.snapshot, &views[0].snapshot));
            assert_eq!(view.freshness, Freshness::Fresh);
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale() {
        let clock = ManualClock::new();
        let ingestor = CountingIngestor::new(Arc::clone(&clock));
        let cache = cache(Arc::clone(&ingestor), Arc::clone(&clock), 3600);

        let first = cache.get_or_refresh().await.unwrap();

        clock.advance_secs(7200);
        ingestor.set_failing(true);
        let second = cache.get_or_refresh().await.unwrap();

        assert_eq!(ingestor.calls(), 2);
        assert!(Arc::ptr_eq(&first.snapshot, &second.snapshot));
        assert_eq!(second.freshness, Freshness::Stale);
    }

    #[tokio::test]
    async fn test_failed_first_refresh_is_fatal() {
        let clock = ManualClock::new();
        let ingestor = CountingIngestor::new(Arc::clone(&clock));
        ingestor.set_failing(true);
        let cache = cache(Arc::clone(&ingestor), Arc::clone(&clock), 3600);

        let err = cache.get_or_refresh().await.unwrap_err();
        assert!(matches!(err, CacheError::NoData(_)));
    }

    #[tokio::test]
    async fn test_force_refresh_ignores_ttl() {
        let clock = ManualClock::new();
        let ingestor = CountingIngestor::new(Arc::clone(&clock));
        let cache = cache(Arc::clone(&ingestor), Arc::clone(&clock), 3600);

        let first = cache.get_or_refresh().await.unwrap();
        // Still well within the TTL; a forced refresh happens anyway.
        clock.advance_secs(1);
        let second = cache.force_refresh().await.unwrap();

        assert_eq!(ingestor.calls(), 2);
        assert!(!Arc::ptr_eq(&first.snapshot, &second.snapshot));
    }

    #[tokio::test]
    async fn test_force_refresh_folds_into_inflight_refresh() {
        let clock = ManualClock::new();
        let ingestor = CountingIngestor::with_delay(Arc::clone(&clock), Duration::from_millis(50));
        let cache = cache(Arc::clone(&ingestor), Arc::clone(&clock), 3600);

        let reader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_or_refresh().await })
        };
        // Give the reader's refresh time to take the gate.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let forced = cache.force_refresh().await.unwrap();
        let read = reader.await.unwrap().unwrap();

        assert_eq!(ingestor.calls(), 1);
        assert!(Arc::ptr_eq(&forced.snapshot, &read.snapshot));
    }

    #[tokio::test]
    async fn test_waiters_share_a_failed_refresh_outcome() {
        let clock = ManualClock::new();
        let ingestor = CountingIngestor::with_delay(Arc::clone(&clock), Duration::from_millis(50));
        let cache = cache(Arc::clone(&ingestor), Arc::clone(&clock), 3600);

        cache.get_or_refresh().await.unwrap();
        clock.advance_secs(7200);
        ingestor.set_failing(true);

        let mut joins = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            joins.push(tokio::spawn(async move { cache.get_or_refresh().await }));
        }
        for join in joins {
            let view = join.await.unwrap().unwrap();
            assert_eq!(view.freshness, Freshness::Stale);
        }

        // One refresh for the initial fill, one shared failed attempt.
        assert_eq!(ingestor.calls(), 2);
    }

    #[tokio::test]
    async fn test_status_reports_age_and_validity() {
        let clock = ManualClock::new();
        let ingestor = CountingIngestor::new(Arc::clone(&clock));
        let cache = cache(Arc::clone(&ingestor), Arc::clone(&clock), 3600);

        assert_eq!(
            cache.status(),
            CacheStatus {
                valid: false,
                age_seconds: None
            }
        );

        cache.get_or_refresh().await.unwrap();
        clock.advance_secs(120);
        assert_eq!(
            cache.status(),
            CacheStatus {
                valid: true,
                age_seconds: Some(120)
            }
        );

        clock.advance_secs(3600);
        assert_eq!(
            cache.status(),
            CacheStatus {
                valid: false,
                age_seconds: Some(3720)
            }
        );
    }
}
