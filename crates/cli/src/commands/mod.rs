//! Subcommand implementations

pub mod checks;
pub mod metrics;
pub mod report;
pub mod services;
