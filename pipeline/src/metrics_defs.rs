//! Metrics definitions for the pipeline.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "Counter",
            MetricType::Gauge => "Gauge",
            MetricType::Histogram => "Histogram",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

#[macro_export]
macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
}

#[macro_export]
macro_rules! gauge {
    ($def:expr) => {
        metrics::gauge!($def.name)
    };
}

#[macro_export]
macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
}

pub const SOURCE_FETCH_PAGES: MetricDef = MetricDef {
    name: "source_fetch.pages",
    metric_type: MetricType::Counter,
    description: "Pages retrieved from upstream filter endpoints",
};

pub const SOURCE_FETCH_RETRIES: MetricDef = MetricDef {
    name: "source_fetch.retries",
    metric_type: MetricType::Counter,
    description: "Page fetches retried after a transient failure",
};

pub const SOURCE_FETCH_FAILURES: MetricDef = MetricDef {
    name: "source_fetch.failures",
    metric_type: MetricType::Counter,
    description: "Sources that failed after exhausting their retry budget",
};

pub const REFRESH_DURATION: MetricDef = MetricDef {
    name: "refresh.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a full four-source refresh in seconds",
};

pub const REFRESH_RECORDS: MetricDef = MetricDef {
    name: "refresh.records",
    metric_type: MetricType::Histogram,
    description: "Merged record count per refresh",
};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "cache.hit",
    metric_type: MetricType::Counter,
    description: "Queries served from a fresh cached snapshot",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "cache.miss",
    metric_type: MetricType::Counter,
    description: "Queries that found the cached snapshot missing or expired",
};

pub const CACHE_STALE_SERVES: MetricDef = MetricDef {
    name: "cache.stale_serves",
    metric_type: MetricType::Counter,
    description: "Snapshots served past their TTL because a refresh failed",
};

// TODO: new metrics must be registered here by hand until a macro collects them.
pub const ALL_METRICS: &[MetricDef] = &[
    SOURCE_FETCH_PAGES,
    SOURCE_FETCH_RETRIES,
    SOURCE_FETCH_FAILURES,
    REFRESH_DURATION,
    REFRESH_RECORDS,
    CACHE_HIT,
    CACHE_MISS,
    CACHE_STALE_SERVES,
];
