//! Metric discovery command

use anyhow::Result;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{print_json, print_rows, print_warning, OutputFormat};

#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    name: String,
}

/// List metric paths on a backend matching `pattern`
pub async fn find_metrics(
    client: &ApiClient,
    source: &str,
    pattern: &str,
    format: OutputFormat,
) -> Result<()> {
    let search = client.find_metrics(source, pattern).await?;

    match format {
        OutputFormat::Json => print_json(&search)?,
        OutputFormat::Table => {
            if search.metrics.is_empty() {
                print_warning(&format!("No {} metrics match '{}'", source, pattern));
                return Ok(());
            }

            let count = search.metrics.len();
            let rows = search
                .metrics
                .into_iter()
                .map(|name| MetricRow { name })
                .collect();
            print_rows::<MetricRow>(rows);
            println!("\nTotal: {} metrics", count);
        }
    }

    Ok(())
}
