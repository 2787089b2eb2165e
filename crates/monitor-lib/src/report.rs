//! Historical outage reporting
//!
//! Results are split into maximal runs of equal `succeeded`. A problem
//! interval opens at the first result of a failing run and closes at the
//! first result of the next passing run, or stays open if none follows.

use crate::error::StoreError;
use crate::models::{CheckId, StatusCheckResult};
use crate::store::{Store, TimeRange};
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemInterval {
    pub start: DateTime<Utc>,
    /// `None` while the check is still failing
    pub end: Option<DateTime<Utc>>,
    /// Seconds from start to end, or to `now` when open
    pub duration_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub check_id: CheckId,
    pub check_name: String,
    pub problems: Vec<ProblemInterval>,
    /// Percentage of succeeded results; `None` without results
    pub success_rate: Option<f64>,
    pub total_results: usize,
}

/// Outage windows from time-ordered results
pub fn problem_intervals(results: &[StatusCheckResult], now: DateTime<Utc>) -> Vec<ProblemInterval> {
    let mut intervals = Vec::new();
    let mut open: Option<DateTime<Utc>> = None;

    for result in results {
        match (open, result.succeeded) {
            (None, false) => open = Some(result.time),
            (Some(start), true) => {
                intervals.push(ProblemInterval {
                    start,
                    end: Some(result.time),
                    duration_secs: (result.time - start).num_seconds(),
                });
                open = None;
            }
            _ => {}
        }
    }

    if let Some(start) = open {
        intervals.push(ProblemInterval {
            start,
            end: None,
            duration_secs: (now - start).num_seconds(),
        });
    }
    intervals
}

pub fn success_rate(results: &[StatusCheckResult]) -> Option<f64> {
    if results.is_empty() {
        return None;
    }
    let succeeded = results.iter().filter(|r| r.succeeded).count();
    Some(succeeded as f64 / results.len() as f64 * 100.0)
}

/// Range covering whole days `date_from..=date_to` in UTC
pub fn date_range(date_from: NaiveDate, date_to: NaiveDate) -> TimeRange {
    let end = date_to
        .checked_add_days(Days::new(1))
        .unwrap_or(date_to)
        .and_time(chrono::NaiveTime::MIN)
        .and_utc();
    TimeRange {
        start: date_from.and_time(chrono::NaiveTime::MIN).and_utc(),
        end,
    }
}

pub async fn build_report(
    store: &dyn Store,
    check_ids: &[CheckId],
    date_from: NaiveDate,
    date_to: NaiveDate,
    now: DateTime<Utc>,
) -> Result<Vec<CheckReport>, StoreError> {
    let range = date_range(date_from, date_to);
    let mut reports = Vec::with_capacity(check_ids.len());

    for &check_id in check_ids {
        let check = store.get_check(check_id).await?;
        let results = store.results(check_id, Some(range)).await?;
        reports.push(CheckReport {
            check_id,
            check_name: check.name,
            problems: problem_intervals(&results, now),
            success_rate: success_rate(&results),
            total_results: results.len(),
        });
    }
    Ok(reports)
}
