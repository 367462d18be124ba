use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::FetchError;

/// Which tracker deployment a record came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
    Internal,
    Vendor,
}

impl Origin {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Origin::Internal => "internal",
            Origin::Vendor => "vendor",
        }
    }
}

/// Which of the four upstream filters produced a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SourceFilter {
    Degrade,
    Resolved,
}

impl SourceFilter {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SourceFilter::Degrade => "degrade",
            SourceFilter::Resolved => "resolved",
        }
    }
}

/// Identity of one of the four upstream filter endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceKey {
    pub origin: Origin,
    pub filter: SourceFilter,
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.origin.as_str(), self.filter.as_str())
    }
}

/// One tracked issue, normalized from the tracker wire format.
#[derive(Clone, Debug, PartialEq)]
pub struct IssueRecord {
    /// Tracker issue key, unique within its origin system.
    pub id: String,
    pub origin: Origin,
    pub source_filter: SourceFilter,
    pub created_at: DateTime<Utc>,
    /// Present only once the issue has been resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Absent means unassigned.
    pub assignee: Option<String>,
    pub status: String,
}

impl IssueRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            origin: self.origin,
            filter: self.source_filter,
            id: self.id.clone(),
        }
    }

    pub fn source(&self) -> SourceKey {
        SourceKey {
            origin: self.origin,
            filter: self.source_filter,
        }
    }
}

/// Dedup identity of a record within a snapshot. The same real-world issue
/// must never be counted twice inside one logical set, even when it shows up
/// on multiple pages.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub origin: Origin,
    pub filter: SourceFilter,
    pub id: String,
}

/// Fully merged view of all ingested records at one point in time.
///
/// Published behind an `Arc` and replaced wholesale on refresh, never mutated
/// in place, so consumers can never observe a partially merged state.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub degrade_records: Vec<IssueRecord>,
    pub resolved_records: Vec<IssueRecord>,
    pub fetched_at: DateTime<Utc>,
    /// Sources that failed after exhausting their retries on the refresh that
    /// produced this snapshot.
    pub source_errors: BTreeMap<SourceKey, FetchError>,
}

impl Snapshot {
    /// True when at least one of the four sources failed on the refresh.
    pub fn is_partial(&self) -> bool {
        !self.source_errors.is_empty()
    }
}
