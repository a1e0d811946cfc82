//! Integration tests for the shiplog CLI
//!
//! These tests exercise the full CLI workflow using a temporary database.
//! They verify that commands work end-to-end without mocking.

use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Helper to run shiplog inside `dir` with a database in that directory
fn run_shiplog(args: &[&str], dir: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_shiplog"))
        .args(args)
        .current_dir(dir)
        .env("SHIPLOG_DB_PATH", dir.join("test.db"))
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1")
        .output()
        .expect("Failed to execute shiplog")
}

/// Helper to get stdout as string
fn stdout(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Helper to get stderr as string
fn stderr(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

/// Run and require success
fn ok(args: &[&str], dir: &Path) -> String {
    let output = run_shiplog(args, dir);
    assert!(
        output.status.success(),
        "{:?} failed: {}",
        args,
        stderr(&output)
    );
    stdout(&output)
}

const TELEMETRY: &str = "\"WinchDAC\",\"v2.1\"
\"\"
\"\"
\"\"
\"\"
\"\"
\"\"
\"\"
\"Seconds\",\"Clock\",\"W1 Tension\",\"W1 Speed\",\"W1 Payout\",\"W2 Tension\",\"W2 Speed\",\"W2 Payout\",\"W3 Tension\",\"W3 Speed\",\"W3 Payout\"
\"s\",\"\",\"lbs\",\"m/min\",\"m\",\"lbs\",\"m/min\",\"m\",\"lbs\",\"m/min\",\"m\"
1,06/01/2024 09:30:00 AM,321.4,40,1200,0,0,0,0,0,0
2,06/01/2024 10:30:00 AM,150,20,600,0,0,0,0,0,0
";

/// A cruise with a CTD on winch 1 and telemetry for the morning of 2024-06-01
fn setup_cruise(dir: &Path) {
    ok(&["event", "add", "Deploy"], dir);
    ok(&["event", "add", "Recover"], dir);
    ok(&["device", "add", "CTD", "--event", "Deploy", "--event", "Recover"], dir);
    ok(&["wire", "add", "Main", "W-100"], dir);
    ok(&["config", "add", "CTD", "--wire", "W-100", "--winch", "1"], dir);
    ok(&["cruise", "add", "Spring Survey", "AE1", "--start", "2024-06-01 00:00"], dir);
    ok(&["cruise", "add-config", "AE1", "1"], dir);

    let winch_dir = dir.join("data").join("winch");
    std::fs::create_dir_all(&winch_dir).unwrap();
    std::fs::write(winch_dir.join("2024-06-01 00-00-00 WinchDAC.csv"), TELEMETRY).unwrap();
}

// =============================================================================
// Basic Command Tests
// =============================================================================

#[test]
fn test_help_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_shiplog"))
        .arg("--help")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("shiplog"));
    assert!(out.contains("Shipboard event log"));
}

#[test]
fn test_version_command() {
    let output = Command::new(env!("CARGO_BIN_EXE_shiplog"))
        .arg("--version")
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    assert!(stdout(&output).contains("shiplog"));
}

// =============================================================================
// Shell Completion Tests
// =============================================================================

#[test]
fn test_completion_zsh() {
    let output = Command::new(env!("CARGO_BIN_EXE_shiplog"))
        .args(["completion", "zsh"])
        .output()
        .expect("Failed to execute");

    assert!(
        output.status.success(),
        "completion zsh failed: {}",
        stderr(&output)
    );
    assert!(
        stdout(&output).contains("#compdef shiplog"),
        "zsh completion should contain #compdef"
    );
}

#[test]
fn test_completion_bash() {
    let output = Command::new(env!("CARGO_BIN_EXE_shiplog"))
        .args(["completion", "bash"])
        .output()
        .expect("Failed to execute");

    assert!(output.status.success());
    assert!(stdout(&output).contains("shiplog"));
}

// =============================================================================
// Setup Commands
// =============================================================================

#[test]
fn test_init_seeds_events_and_config() {
    let temp = TempDir::new().unwrap();
    let out = ok(&["init"], temp.path());
    assert!(out.contains("Initialized"));
    assert!(temp.path().join(".shiplog").join("config.toml").exists());

    let events = ok(&["event", "list", "--json"], temp.path());
    let parsed: serde_json::Value = serde_json::from_str(&events).unwrap();
    let names: Vec<&str> = parsed
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Deploy", "Recover"]);

    // running init again must not fail on the existing events
    ok(&["init"], temp.path());
}

#[test]
fn test_device_hierarchy() {
    let temp = TempDir::new().unwrap();
    ok(&["device", "add", "Plankton Tow"], temp.path());
    ok(&["device", "add", "Zooplankton Tow", "--parent", "Plankton Tow"], temp.path());

    let tree = ok(&["device", "tree"], temp.path());
    assert!(tree.contains("Plankton Tow\n  Zooplankton Tow"));

    let output = run_shiplog(&["device", "set-parent", "Plankton Tow", "Zooplankton Tow"], temp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("cycle"));
}

#[test]
fn test_invalid_winch_rejected() {
    let temp = TempDir::new().unwrap();
    ok(&["device", "add", "CTD"], temp.path());
    let output = run_shiplog(&["config", "add", "CTD", "--winch", "5"], temp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Winch must be between 0 and 3"));
}

// =============================================================================
// Cruise Tests
// =============================================================================

#[test]
fn test_active_cruise() {
    let temp = TempDir::new().unwrap();
    ok(&["cruise", "add", "Old", "AE0", "--start", "2020-01-01 00:00", "--end", "2020-02-01 00:00"], temp.path());
    ok(&["cruise", "add", "Current", "AE1", "--start", "2024-06-01 00:00"], temp.path());

    let active = ok(&["cruise", "active"], temp.path());
    assert!(active.contains("ACTIVE - Current (AE1)"));

    let list = ok(&["cruise", "list"], temp.path());
    assert!(list.contains("ENDED - Old (AE0)"));
}

#[test]
fn test_overlapping_cruises_reported() {
    let temp = TempDir::new().unwrap();
    ok(&["cruise", "add", "First", "AE1", "--start", "2024-06-01 00:00"], temp.path());
    let output = run_shiplog(&["cruise", "add", "Second", "AE2", "--start", "2024-07-01 00:00"], temp.path());
    assert!(output.status.success());
    assert!(stderr(&output).contains("overlaps"));

    let output = run_shiplog(&["cruise", "active"], temp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Overlapping cruises not allowed"));

    let check = ok(&["cruise", "check"], temp.path());
    assert!(check.contains("AE1 overlaps AE2"));
}

#[test]
fn test_active_cruise_identity_is_read_only() {
    let temp = TempDir::new().unwrap();
    ok(&["cruise", "add", "Current", "AE1", "--start", "2024-06-01 00:00"], temp.path());
    let output = run_shiplog(&["cruise", "edit", "AE1", "--name", "Renamed"], temp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("cannot change name"));
}

// =============================================================================
// Logging and Cast Tests
// =============================================================================

#[test]
fn test_deploy_recover_derives_cast() {
    let temp = TempDir::new().unwrap();
    setup_cruise(temp.path());

    ok(&["log", "CTD", "Deploy", "--at", "2024-06-01 09:00"], temp.path());
    let out = ok(&["log", "CTD", "Recover", "--at", "2024-06-01 11:00"], temp.path());
    assert!(out.contains("Derived cast 1"), "got: {}", out);
    assert!(out.contains("tension 321.4"));

    let casts = ok(&["casts", "--json"], temp.path());
    let parsed: serde_json::Value = serde_json::from_str(&casts).unwrap();
    let casts = parsed.as_array().unwrap();
    assert_eq!(casts.len(), 1);
    assert_eq!(casts[0]["report"]["max_payout"], 1200.0);

    // asking again recomputes instead of adding a second cast
    let again = ok(&["analyze", "2"], temp.path());
    assert!(again.contains("Recomputed cast 1"));
    let parsed: serde_json::Value = serde_json::from_str(&ok(&["casts", "--json"], temp.path())).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
}

#[test]
fn test_no_analyze_then_analyze() {
    let temp = TempDir::new().unwrap();
    setup_cruise(temp.path());

    ok(&["log", "CTD", "Deploy", "--at", "2024-06-01 09:00"], temp.path());
    let out = ok(&["log", "CTD", "Recover", "--at", "2024-06-01 11:00", "--no-analyze"], temp.path());
    assert!(!out.contains("cast"));
    assert!(ok(&["casts"], temp.path()).contains("No casts."));

    let out = ok(&["analyze", "2"], temp.path());
    assert!(out.contains("Derived cast 1"));
}

#[test]
fn test_recover_without_deploy() {
    let temp = TempDir::new().unwrap();
    setup_cruise(temp.path());
    let out = ok(&["log", "CTD", "Recover", "--at", "2024-06-01 11:00"], temp.path());
    assert!(out.contains("No cast:"));
}

#[test]
fn test_analyze_rejects_deploy() {
    let temp = TempDir::new().unwrap();
    setup_cruise(temp.path());
    ok(&["log", "CTD", "Deploy", "--at", "2024-06-01 09:00"], temp.path());
    let output = run_shiplog(&["analyze", "1"], temp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("not a Recover"));
}

#[test]
fn test_log_without_active_cruise() {
    let temp = TempDir::new().unwrap();
    setup_cruise(temp.path());
    let output = run_shiplog(&["log", "CTD", "Deploy", "--at", "2023-01-01 09:00"], temp.path());
    assert!(!output.status.success());
    assert!(stderr(&output).contains("no active cruise"));
}

// =============================================================================
// Export Tests
// =============================================================================

#[test]
fn test_exports() {
    let temp = TempDir::new().unwrap();
    setup_cruise(temp.path());
    ok(&["log", "CTD", "Deploy", "--at", "2024-06-01 09:00"], temp.path());
    ok(&["log", "CTD", "Recover", "--at", "2024-06-01 11:00"], temp.path());

    let out = ok(&["export", "events", "--cruise", "AE1"], temp.path());
    assert!(out.contains("EventLog_AE1.csv"));
    let events = std::fs::read_to_string(temp.path().join("media").join("EventLog_AE1.csv")).unwrap();
    let lines: Vec<&str> = events.lines().collect();
    assert_eq!(lines[0], "Date,Time,Device,Event,Latitude,Longitude");
    assert_eq!(lines[1], "2024-06-01,09:00:00,CTD,Deploy,0°0.0000',0°0.0000'");
    assert_eq!(lines.len(), 3);

    ok(&["export", "casts"], temp.path());
    let casts = std::fs::read_to_string(temp.path().join("media").join("CastLog_All.csv")).unwrap();
    assert!(casts.contains("2024-06-01 09:00:00,2024-06-01 11:00:00,CTD,321.4,40.0,1200.0,W-100,1"));

    ok(&["wire-report", "W-100", "--start", "2024-06-01", "--end", "2024-06-01"], temp.path());
    let report = std::fs::read_to_string(temp.path().join("media").join("WireReport_W-100.csv")).unwrap();
    assert!(report.contains("2024-06-01 11:00:00,321.4,40.0,1200.0"));
}
