// Test module - relaxed lint rules
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! Tests for the strategy probe.

use std::path::PathBuf;
use std::process::Command;

fn spawnbox_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_spawnbox"))
}

fn wrapper_path() -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_BIN_EXE_spawnbox"));
    path.set_file_name("spawnbox-wrapper");
    path
}

#[test]
fn probe_reports_the_sandboxed_strategy_with_a_helper() {
    let output = spawnbox_bin()
        .args(["probe", "--json", "--wrapper"])
        .arg(wrapper_path())
        .output()
        .expect("spawnbox runs");

    assert!(output.status.success());
    let payload: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(payload["os"], std::env::consts::OS);
    assert_eq!(payload["strategy"], "sandboxed");
    assert!(payload["helper"].as_str().unwrap().ends_with("spawnbox-wrapper"));
}

#[test]
fn probe_falls_back_to_local_without_a_helper() {
    let output = spawnbox_bin()
        .args(["probe", "--json", "--wrapper", "/nonexistent/helper"])
        .output()
        .expect("spawnbox runs");

    assert!(output.status.success());
    let payload: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(payload["strategy"], "local");
    assert!(payload["helper"].is_null());
}

#[test]
fn probe_human_output_names_the_strategy() {
    let output = spawnbox_bin()
        .args(["probe", "--wrapper"])
        .arg(wrapper_path())
        .output()
        .expect("spawnbox runs");

    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("strategy: sandboxed"), "unexpected output: {text}");
}
