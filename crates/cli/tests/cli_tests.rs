//! CLI integration tests

use std::process::Command;

fn smon(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_smon"))
        .args(args)
        .env_remove("SMON_API_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = smon(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("Status Monitor"), "Should show app name");
    assert!(stdout.contains("services"), "Should show services command");
    assert!(stdout.contains("checks"), "Should show checks command");
    assert!(stdout.contains("results"), "Should show results command");
    assert!(stdout.contains("report"), "Should show report command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = smon(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("smon"), "Should show binary name");
}

/// Test results subcommand help
#[test]
fn test_results_help() {
    let output = smon(&["results", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Results help should succeed");
    assert!(stdout.contains("--limit"), "Should show limit option");
}

/// Test report subcommand help
#[test]
fn test_report_help() {
    let output = smon(&["report", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Report help should succeed");
    assert!(stdout.contains("--from"), "Should show from option");
    assert!(stdout.contains("--to"), "Should show to option");
}

/// Test metrics subcommand help
#[test]
fn test_metrics_help() {
    let output = smon(&["metrics", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Metrics help should succeed");
    assert!(stdout.contains("--source"), "Should show source option");
}

/// Report needs at least one check and a valid date
#[test]
fn test_report_argument_validation() {
    let output = smon(&["report", "--from", "2024-01-01", "--to", "2024-01-02"]);
    assert!(!output.status.success(), "Report without IDs should fail");

    let output = smon(&["report", "1", "--from", "yesterday", "--to", "2024-01-02"]);
    assert!(!output.status.success(), "Invalid date should fail");
}

/// Test format option values
#[test]
fn test_invalid_format_rejected() {
    let output = smon(&["--format", "yaml", "services"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Unknown format should fail");
    assert!(stderr.contains("yaml"), "Should name the bad value");
}

/// Unreachable API is reported as an error
#[test]
fn test_unreachable_api() {
    let output = smon(&["--api-url", "http://127.0.0.1:1", "services"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Unreachable API should fail");
    assert!(stderr.contains("Failed to send request"));
}
