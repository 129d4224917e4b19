use assert_cmd::prelude::*;
use rstest::rstest;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

fn write_config(dir: &tempfile::TempDir) -> PathBuf {
    let toml = format!(
        r#"
[sim]
latency_ms = 1
reservoir_u = 40.0

[storage]
state_file = '{}'
ledger_file = '{}'
"#,
        dir.path().join("state.json").display(),
        dir.path().join("ledger.json").display()
    );
    let path = dir.path().join("cfg.toml");
    fs::write(&path, toml).unwrap();
    path
}

fn run_json(cfg: &PathBuf, args: &[&str]) -> (Option<i32>, String, String) {
    let mut cmd = Command::cargo_bin("podctl").unwrap();
    cmd.arg("--config").arg(cfg).arg("--json").args(args);
    let out = cmd.output().unwrap();
    (
        out.status.code(),
        String::from_utf8_lossy(&out.stdout).into_owned(),
        String::from_utf8_lossy(&out.stderr).into_owned(),
    )
}

fn last_json_line(text: &str) -> serde_json::Value {
    let line = text
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .expect("a JSON line");
    serde_json::from_str(line).unwrap()
}

#[rstest]
fn status_before_any_exchange_is_stale() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);

    let (code, stdout, _) = run_json(&cfg, &["status"]);
    assert_eq!(code, Some(0));
    let v = last_json_line(&stdout);
    assert_eq!(v["basal"]["state"], "active");
    assert_eq!(v["bolus"]["state"], "none");
    assert_eq!(v["pump_data_stale"], true);
    assert!(v["last_status_date"].is_null());
    assert!(v["pod_expires_at"].is_string());
}

#[rstest]
fn refresh_reports_reservoir_below_threshold() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);

    let (code, stdout, _) = run_json(&cfg, &["refresh"]);
    assert_eq!(code, Some(0));
    let v = last_json_line(&stdout);
    assert_eq!(v["pump_data_stale"], false);
    assert_eq!(v["reservoir"]["level"], "valid");
    let units = v["reservoir"]["units"].as_f64().unwrap();
    assert!(units > 39.0 && units <= 40.0, "reservoir {units}");
}

#[rstest]
fn bolus_json_carries_sync_identifier_and_running_status() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);

    let (code, stdout, _) = run_json(&cfg, &["bolus", "--units", "1.5"]);
    assert_eq!(code, Some(0));
    let v = last_json_line(&stdout);
    assert!(v["sync_identifier"].as_str().unwrap().starts_with("bolus:"));
    assert_eq!(v["dose"]["programmed_pulses"], 30);
    assert_eq!(v["dose"]["certainty"], "certain");

    let (_, stdout, _) = run_json(&cfg, &["status"]);
    let v = last_json_line(&stdout);
    assert_eq!(v["bolus"]["state"], "in_progress");
    assert!(v["bolus_progress"]["percent_complete"].as_f64().unwrap() < 1.0);
}

#[rstest]
fn comm_failure_json_error_on_stderr() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);

    let (code, stdout, stderr) = run_json(&cfg, &["--fail-next", "transport", "bolus", "--units", "1"]);
    assert_eq!(code, Some(4));
    assert!(stdout.trim().is_empty());
    let v = last_json_line(&stderr);
    assert_eq!(v["reason"], "CommunicationFailure");
    assert_eq!(v["details"]["may_have_executed"], true);
}

#[rstest]
fn invalid_program_json_error() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir);

    let (code, _, stderr) = run_json(&cfg, &["temp-basal", "--rate", "50", "--minutes", "60"]);
    assert_eq!(code, Some(5));
    let v = last_json_line(&stderr);
    assert_eq!(v["reason"], "InvalidProgram");
}
