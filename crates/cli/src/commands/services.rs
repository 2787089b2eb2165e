//! Service and instance status commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, FailingCheck};
use crate::output::{
    color_status, print_info, print_json, print_rows, print_success, print_warning, truncate,
    OutputFormat,
};

/// Row for services table
#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failing")]
    failing: usize,
    #[tabled(rename = "Alerts")]
    alerts: String,
}

/// Row for instances table
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Failing")]
    failing: usize,
}

/// Row for failing checks
#[derive(Tabled)]
struct FailingRow {
    #[tabled(rename = "Check")]
    check_id: u64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Importance")]
    importance: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn failing_rows(checks: &[FailingCheck]) -> Vec<FailingRow> {
    checks
        .iter()
        .map(|c| FailingRow {
            check_id: c.check_id,
            name: c.name.clone(),
            importance: color_status(&c.importance),
            message: truncate(&c.message, 60),
        })
        .collect()
}

/// List services with their overall status
pub async fn list_services(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let services = client.services().await?;

    match format {
        OutputFormat::Json => print_json(&services)?,
        OutputFormat::Table => {
            if services.is_empty() {
                print_warning("No services configured");
                return Ok(());
            }

            let failing = services.iter().filter(|s| s.status != "PASSING").count();
            let rows = services
                .iter()
                .map(|s| StatusRow {
                    id: s.id,
                    name: s.name.clone(),
                    status: color_status(&s.status),
                    failing: s.failing_checks.len(),
                    alerts: if s.alerts_enabled { "on" } else { "off" }.to_string(),
                })
                .collect();
            print_rows::<StatusRow>(rows);

            if failing == 0 {
                print_success(&format!("All {} services passing", services.len()));
            } else {
                print_warning(&format!("{} of {} services failing", failing, services.len()));
            }
        }
    }

    Ok(())
}

/// Show one service and its failing checks
pub async fn show_service(client: &ApiClient, id: u64, format: OutputFormat) -> Result<()> {
    let service = client.service(id).await?;

    match format {
        OutputFormat::Json => print_json(&service)?,
        OutputFormat::Table => {
            println!("Service: {} (#{})", service.name, service.id);
            if let Some(url) = &service.url {
                println!("URL:     {}", url);
            }
            println!("Status:  {}", color_status(&service.status));
            println!(
                "Alerts:  {}",
                if service.alerts_enabled { "enabled" } else { "disabled" }
            );
            println!();

            if service.failing_checks.is_empty() {
                print_success("No failing checks");
            } else {
                print_rows(failing_rows(&service.failing_checks));
            }
        }
    }

    Ok(())
}

/// List instances with their own check status
pub async fn list_instances(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let instances = client.instances().await?;

    match format {
        OutputFormat::Json => print_json(&instances)?,
        OutputFormat::Table => {
            if instances.is_empty() {
                print_info("No instances configured");
                return Ok(());
            }

            let rows = instances
                .iter()
                .map(|i| InstanceRow {
                    id: i.id,
                    name: i.name.clone(),
                    address: i.address.clone().unwrap_or_else(|| "-".to_string()),
                    status: color_status(&i.status),
                    failing: i.failing_checks.len(),
                })
                .collect();
            print_rows::<InstanceRow>(rows);
        }
    }

    Ok(())
}
