//! Outage report command

use anyhow::{bail, Result};
use chrono::NaiveDate;
use tabled::Tabled;

use crate::client::{ApiClient, CheckReport};
use crate::output::{format_duration, format_rate, print_json, print_rows, print_success, OutputFormat};

/// Row for problem intervals
#[derive(Tabled)]
struct ProblemRow {
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "End")]
    end: String,
    #[tabled(rename = "Duration")]
    duration: String,
}

/// Show problem intervals and success rate for each check
pub async fn show_report(
    client: &ApiClient,
    check_ids: &[u64],
    from: NaiveDate,
    to: NaiveDate,
    format: OutputFormat,
) -> Result<()> {
    if from > to {
        bail!("--from ({}) must not be after --to ({})", from, to);
    }

    let from = from.to_string();
    let to = to.to_string();
    let mut reports: Vec<CheckReport> = Vec::with_capacity(check_ids.len());
    for &id in check_ids {
        reports.push(client.report(id, &from, &to).await?);
    }

    match format {
        OutputFormat::Json => print_json(&reports)?,
        OutputFormat::Table => {
            for report in &reports {
                println!(
                    "{} (#{}): {} results, success rate {}",
                    report.check_name,
                    report.check_id,
                    report.total_results,
                    format_rate(report.success_rate)
                );

                if report.problems.is_empty() {
                    print_success("No problems in range");
                } else {
                    let rows = report
                        .problems
                        .iter()
                        .map(|p| ProblemRow {
                            start: p.start.clone(),
                            end: p.end.clone().unwrap_or_else(|| "ongoing".to_string()),
                            duration: format_duration(p.duration_secs),
                        })
                        .collect();
                    print_rows::<ProblemRow>(rows);
                }
                println!();
            }
        }
    }

    Ok(())
}
