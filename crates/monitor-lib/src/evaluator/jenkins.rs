//! CI job checks

use super::CheckOutcome;
use crate::error::CheckError;
use crate::models::JenkinsCheck;
use crate::sources::{JobStatus, JobStatusSource};

pub async fn run(
    source: &dyn JobStatusSource,
    check: &JenkinsCheck,
) -> Result<CheckOutcome, CheckError> {
    let status = source.get_job_status(&check.job_name).await?;
    Ok(evaluate_job(check, &status))
}

pub fn evaluate_job(check: &JenkinsCheck, status: &JobStatus) -> CheckOutcome {
    let raw = serde_json::to_value(status).unwrap_or_default();

    if !status.active {
        return CheckOutcome::failure("Job disabled", raw);
    }

    if let (Some(max_minutes), Some(blocked_secs)) =
        (check.max_queued_build_time, status.blocked_build_time)
    {
        let blocked_minutes = (blocked_secs / 60.0).floor() as u64;
        if blocked_secs > max_minutes.saturating_mul(60) as f64 {
            return CheckOutcome::failure(
                format!("Job blocked for {blocked_minutes} minutes (max {max_minutes})"),
                raw,
            );
        }
    }

    if !status.succeeded {
        let message = match status.job_number {
            Some(number) => format!("Job failed (build #{number})"),
            None => "Job failed".to_string(),
        };
        return CheckOutcome::failure(message, raw);
    }

    match status.job_number {
        Some(number) => CheckOutcome::success(format!("Build #{number} succeeded"), raw),
        None => CheckOutcome::success("Job succeeded", raw),
    }
}
