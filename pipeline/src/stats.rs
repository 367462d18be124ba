//! Aggregation over a snapshot: overall ratio, ISO-week trend, per-assignee
//! distribution. Pure functions of their inputs; an empty snapshot yields an
//! empty report, never an error.

use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{IssueRecord, Snapshot};

/// Bucket label for records with no assignee.
pub const UNASSIGNED: &str = "(unassigned)";

/// Date-range and owner restriction applied per query. Bounds are inclusive
/// calendar dates.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatsFilter {
    pub from: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub owner: Option<String>,
}

impl StatsFilter {
    fn matches(&self, date: NaiveDate, assignee: Option<&str>) -> bool {
        if let Some(from) = self.from
            && date < from
        {
            return false;
        }
        if let Some(until) = self.until
            && date > until
        {
            return false;
        }
        if let Some(owner) = &self.owner
            && normalize_assignee(assignee) != owner
        {
            return false;
        }
        true
    }
}

/// One ISO-8601 calendar week. `week` uses the ISO week-year, so a January
/// date can land in the previous year's last week and vice versa.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WeekBucket {
    pub week: String,
    pub week_start: NaiveDate,
    pub week_end: NaiveDate,
    pub degrade_count: u64,
    pub resolved_count: u64,
    pub percent: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssigneeBucket {
    pub assignee: String,
    pub degrade_count: u64,
    pub resolved_count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsReport {
    pub total_degrade: u64,
    pub total_resolved: u64,
    /// `total_degrade / total_resolved × 100`, 0 when there are no resolved
    /// records.
    pub degrade_percent: f64,
    /// Chronological, dense between the first and last observed week.
    pub weekly: Vec<WeekBucket>,
    /// Descending by combined count, ties broken by name.
    pub assignees: Vec<AssigneeBucket>,
    /// Every assignee seen anywhere in the snapshot, ignoring the filter.
    pub owners: Vec<String>,
}

/// Computes the full report for one snapshot under one filter.
///
/// Degrade records are dated by `created_at`, resolved records by
/// `resolved_at`; the two fields are deliberately different. A resolved
/// record that has no resolution date yet is excluded outright so that
/// per-bucket sums always equal the totals.
pub fn compute(snapshot: &Snapshot, filter: &StatsFilter) -> StatsReport {
    let degrade: Vec<(&IssueRecord, NaiveDate)> = snapshot
        .degrade_records
        .iter()
        .map(|record| (record, record.created_at.date_naive()))
        .filter(|(record, date)| filter.matches(*date, record.assignee.as_deref()))
        .collect();
    let resolved: Vec<(&IssueRecord, NaiveDate)> = snapshot
        .resolved_records
        .iter()
        .filter_map(|record| record.resolved_at.map(|ts| (record, ts.date_naive())))
        .filter(|(record, date)| filter.matches(*date, record.assignee.as_deref()))
        .collect();

    let total_degrade = degrade.len() as u64;
    let total_resolved = resolved.len() as u64;

    StatsReport {
        total_degrade,
        total_resolved,
        degrade_percent: ratio_percent(total_degrade, total_resolved),
        weekly: weekly_buckets(&degrade, &resolved),
        assignees: assignee_buckets(&degrade, &resolved),
        owners: owners(snapshot),
    }
}

fn weekly_buckets(
    degrade: &[(&IssueRecord, NaiveDate)],
    resolved: &[(&IssueRecord, NaiveDate)],
) -> Vec<WeekBucket> {
    // Keyed by the week's Monday; BTreeMap keeps the weeks chronological.
    let mut weeks: BTreeMap<NaiveDate, (u64, u64)> = BTreeMap::new();
    for (_, date) in degrade {
        weeks.entry(week_monday(*date)).or_default().0 += 1;
    }
    for (_, date) in resolved {
        weeks.entry(week_monday(*date)).or_default().1 += 1;
    }

    let (Some(first), Some(last)) = (
        weeks.keys().next().copied(),
        weeks.keys().next_back().copied(),
    ) else {
        return Vec::new();
    };

    let mut buckets = Vec::new();
    let mut monday = first;
    while monday <= last {
        let (degrade_count, resolved_count) = weeks.get(&monday).copied().unwrap_or_default();
        buckets.push(WeekBucket {
            week: week_key(monday),
            week_start: monday,
            week_end: monday + Duration::days(6),
            degrade_count,
            resolved_count,
            percent: ratio_percent(degrade_count, resolved_count),
        });
        monday += Duration::days(7);
    }
    buckets
}

fn assignee_buckets(
    degrade: &[(&IssueRecord, NaiveDate)],
    resolved: &[(&IssueRecord, NaiveDate)],
) -> Vec<AssigneeBucket> {
    let mut counts: BTreeMap<&str, (u64, u64)> = BTreeMap::new();
    for (record, _) in degrade {
        counts
            .entry(normalize_assignee(record.assignee.as_deref()))
            .or_default()
            .0 += 1;
    }
    for (record, _) in resolved {
        counts
            .entry(normalize_assignee(record.assignee.as_deref()))
            .or_default()
            .1 += 1;
    }

    let mut buckets: Vec<AssigneeBucket> = counts
        .into_iter()
        .map(|(assignee, (degrade_count, resolved_count))| AssigneeBucket {
            assignee: assignee.to_string(),
            degrade_count,
            resolved_count,
        })
        .collect();
    buckets.sort_by(|a, b| {
        (b.degrade_count + b.resolved_count)
            .cmp(&(a.degrade_count + a.resolved_count))
            .then_with(|| a.assignee.cmp(&b.assignee))
    });
    buckets
}

fn owners(snapshot: &Snapshot) -> Vec<String> {
    let names: BTreeSet<&str> = snapshot
        .degrade_records
        .iter()
        .chain(&snapshot.resolved_records)
        .map(|record| normalize_assignee(record.assignee.as_deref()))
        .collect();
    names.into_iter().map(String::from).collect()
}

fn normalize_assignee(assignee: Option<&str>) -> &str {
    assignee.filter(|name| !name.is_empty()).unwrap_or(UNASSIGNED)
}

fn week_monday(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

fn week_key(monday: NaiveDate) -> String {
    let iso = monday.iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}

fn ratio_percent(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    let percent = numerator as f64 / denominator as f64 * 100.0;
    (percent * 100.0).round() / 100.0
}
