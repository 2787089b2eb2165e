//! Check listing and result history commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{color_status, print_json, print_rows, print_warning, truncate, OutputFormat};

/// Row for checks table
#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Importance")]
    importance: String,
    #[tabled(rename = "Every")]
    frequency: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Last Result")]
    last_result: String,
}

/// Row for results table
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Message")]
    message: String,
}

/// List checks with their effective status
pub async fn list_checks(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let checks = client.checks().await?;

    match format {
        OutputFormat::Json => print_json(&checks)?,
        OutputFormat::Table => {
            if checks.is_empty() {
                print_warning("No checks configured");
                return Ok(());
            }

            let rows = checks
                .iter()
                .map(|c| CheckRow {
                    id: c.id,
                    name: c.name.clone(),
                    kind: c.kind.clone(),
                    importance: c.importance.clone(),
                    frequency: format!("{}m", c.frequency),
                    status: if c.active {
                        color_status(&c.effective_status)
                    } else {
                        "inactive".to_string()
                    },
                    last_result: c
                        .last_result
                        .as_ref()
                        .map(|r| truncate(&r.message, 40))
                        .unwrap_or_else(|| "-".to_string()),
                })
                .collect();
            print_rows::<CheckRow>(rows);
            println!("\nTotal: {} checks", checks.len());
        }
    }

    Ok(())
}

/// Show the most recent results of a check
pub async fn show_results(
    client: &ApiClient,
    check_id: u64,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let results = client.results(check_id, limit).await?;

    match format {
        OutputFormat::Json => print_json(&results)?,
        OutputFormat::Table => {
            if results.is_empty() {
                print_warning(&format!("No results recorded for check {}", check_id));
                return Ok(());
            }

            // Newest first for reading
            let rows = results
                .iter()
                .rev()
                .map(|r| ResultRow {
                    time: r.time.clone(),
                    result: if r.succeeded {
                        color_status("ok")
                    } else {
                        color_status("failed")
                    },
                    duration: format!("{}ms", r.duration_ms),
                    message: truncate(&r.message, 60),
                })
                .collect();
            print_rows::<ResultRow>(rows);
        }
    }

    Ok(())
}
