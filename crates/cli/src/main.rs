//! Status Monitor CLI
//!
//! A command-line tool for inspecting service status, check results
//! and outage reports from a running status monitor.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use commands::{checks, metrics, report, services};
use output::OutputFormat;

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Status Monitor CLI
#[derive(Parser)]
#[command(name = "smon")]
#[command(author, version, about = "CLI for the Status Monitor", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via SMON_API_URL env var)
    #[arg(long, env = "SMON_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List services and their overall status
    Services,

    /// Show a service and its failing checks
    Service {
        /// Service ID
        id: u64,
    },

    /// List instances and their status
    Instances,

    /// List checks and their effective status
    Checks,

    /// Show recent results of a check
    Results {
        /// Check ID
        id: u64,

        /// Number of results to show
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// Find metric paths on a metric backend
    Metrics {
        /// Pattern to match metric names against
        pattern: String,

        /// Backend to search (graphite or influxdb)
        #[arg(long, short, default_value = "graphite")]
        source: String,
    },

    /// Show problem intervals and success rate over a date range
    Report {
        /// Check IDs
        #[arg(required = true)]
        ids: Vec<u64>,

        /// First day of the range (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,

        /// Last day of the range, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file_config = config::Config::load()?;

    let api_url = cli
        .api_url
        .or(file_config.api_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());
    let format = cli
        .format
        .or_else(|| {
            file_config
                .default_format
                .as_deref()
                .and_then(OutputFormat::from_name)
        })
        .unwrap_or_default();

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match cli.command {
        Commands::Services => services::list_services(&client, format).await?,
        Commands::Service { id } => services::show_service(&client, id, format).await?,
        Commands::Instances => services::list_instances(&client, format).await?,
        Commands::Checks => checks::list_checks(&client, format).await?,
        Commands::Results { id, limit } => {
            checks::show_results(&client, id, limit, format).await?
        }
        Commands::Metrics { pattern, source } => {
            metrics::find_metrics(&client, &source, &pattern, format).await?
        }
        Commands::Report { ids, from, to } => {
            report::show_report(&client, &ids, from, to, format).await?
        }
    }

    Ok(())
}
