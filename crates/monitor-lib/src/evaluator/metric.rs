//! Threshold evaluation for Graphite and InfluxDB checks

use super::CheckOutcome;
use crate::error::CheckError;
use crate::models::MetricCheck;
use crate::sources::{summarize, MetricQuery, MetricSource, Series};
use serde_json::json;

pub async fn run(
    source: &dyn MetricSource,
    check: &MetricCheck,
) -> Result<CheckOutcome, CheckError> {
    let query = MetricQuery::for_check(check);
    let series = source.query(&query).await?;
    Ok(evaluate_series(check, &series))
}

/// Decide pass/fail for already fetched series.
///
/// Order of failure reasons: missing series, missing hosts, then the
/// first windowed value that does not satisfy the comparison.
pub fn evaluate_series(check: &MetricCheck, series: &[Series]) -> CheckOutcome {
    let window = check.interval_minutes.max(1) as usize;
    let summary = summarize(series, window);
    let raw = json!({ "series": series, "summary": summary });

    let expected_metrics = check.expected_num_metrics as usize;
    if expected_metrics > 0 && summary.num_series_with_data < expected_metrics {
        return CheckOutcome::failure(
            format!(
                "Metrics missing | {}/{} series",
                summary.num_series_with_data, expected_metrics
            ),
            raw,
        );
    }

    let expected_hosts = check.expected_num_hosts as usize;
    if expected_hosts > 0 && summary.num_hosts < expected_hosts {
        return CheckOutcome::failure(
            format!("Hosts missing | {}/{} hosts", summary.num_hosts, expected_hosts),
            raw,
        );
    }

    if summary.values.is_empty() {
        return CheckOutcome::success("No datapoints returned", raw);
    }

    let offending = summary
        .values
        .iter()
        .find(|(_, v)| !check.check_type.passes(*v, check.value));

    match offending {
        Some((target, value)) => CheckOutcome::failure(
            format!(
                "{}: {:?} not {} {:?}",
                target, value, check.check_type, check.value
            ),
            raw,
        ),
        None => CheckOutcome::success(
            format!(
                "{} datapoints {} {:?} (max {:?})",
                summary.values.len(),
                check.check_type,
                check.value,
                summary.max.unwrap_or_default()
            ),
            raw,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CheckType;
    use async_trait::async_trait;

    fn check(check_type: CheckType, value: f64) -> MetricCheck {
        MetricCheck {
            metric: "cpu".to_string(),
            metric_selector: "value".to_string(),
            group_by: None,
            fill_empty: None,
            where_clause: None,
            check_type,
            value,
            interval_minutes: 5,
            expected_num_hosts: 0,
            expected_num_metrics: 0,
            fetch_all: false,
        }
    }

    fn series(target: &str, host: Option<&str>, values: &[f64]) -> Series {
        Series {
            target: target.to_string(),
            host: host.map(str::to_string),
            datapoints: values
                .iter()
                .enumerate()
                .map(|(i, v)| (Some(*v), 1_700_000_000 + i as i64 * 60))
                .collect(),
        }
    }

    #[test]
    fn test_strict_less_than_boundary() {
        let check = check(CheckType::Lt, 10.0);

        assert!(evaluate_series(&check, &[series("cpu.a", None, &[9.0])]).succeeded);

        let at = evaluate_series(&check, &[series("cpu.a", None, &[10.0])]);
        assert!(!at.succeeded);
        assert_eq!(at.message, "cpu.a: 10.0 not < 10.0");

        assert!(!evaluate_series(&check, &[series("cpu.a", None, &[11.0])]).succeeded);
    }

    #[test]
    fn test_missing_hosts_fail_regardless_of_values() {
        let mut check = check(CheckType::Lt, 10.0);
        check.expected_num_hosts = 3;
        let data = vec![
            series("cpu.a", Some("a"), &[1.0]),
            series("cpu.b", Some("b"), &[1.0]),
        ];

        let outcome = evaluate_series(&check, &data);
        assert!(!outcome.succeeded);
        assert_eq!(outcome.message, "Hosts missing | 2/3 hosts");
    }

    #[test]
    fn test_missing_metrics() {
        let mut check = check(CheckType::Gt, 0.0);
        check.expected_num_metrics = 2;
        let data = vec![series("a", None, &[1.0]), series("b", None, &[])];

        let outcome = evaluate_series(&check, &data);
        assert!(!outcome.succeeded);
        assert_eq!(outcome.message, "Metrics missing | 1/2 series");
    }

    #[test]
    fn test_no_data_without_expectations_passes() {
        let outcome = evaluate_series(&check(CheckType::Lt, 1.0), &[]);
        assert!(outcome.succeeded);
        assert_eq!(outcome.message, "No datapoints returned");
    }

    #[test]
    fn test_only_trailing_window_is_considered() {
        let mut check = check(CheckType::Lt, 10.0);
        check.interval_minutes = 2;
        // The early spike has aged out of the window
        let data = vec![series("cpu.a", None, &[50.0, 1.0, 2.0])];

        assert!(evaluate_series(&check, &data).succeeded);
    }

    struct DownSource;

    #[async_trait]
    impl MetricSource for DownSource {
        async fn query(&self, _query: &MetricQuery) -> Result<Vec<Series>, CheckError> {
            Err(CheckError::SourceUnavailable("connection refused".to_string()))
        }

        async fn find_metrics(&self, _pattern: &str) -> Result<Vec<String>, CheckError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_source_error_propagates_for_conversion() {
        let err = run(&DownSource, &check(CheckType::Lt, 1.0)).await.unwrap_err();
        assert_eq!(err.to_string(), "Source unavailable: connection refused");
    }
}
