// Test module - relaxed lint rules
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(missing_docs)]

//! Supervision helper binary contract
//!
//! Drives `spawnbox-wrapper` directly, the way the runner does, and checks
//! the exit-code protocol: the command's own code on normal exit, 128 plus
//! the signal number on signal death, 107 when the command cannot be
//! launched, and 2 for command-line misuse.

use std::process::{Command, Output};
use std::time::{Duration, Instant};

fn wrapper() -> Command {
    Command::new(env!("CARGO_BIN_EXE_spawnbox-wrapper"))
}

fn run_wrapper(args: &[&str]) -> Output {
    wrapper().args(args).output().expect("helper runs")
}

// =============================================================================
// Exit code passthrough
// =============================================================================

#[test]
fn command_exit_code_passes_through() {
    let output = run_wrapper(&["--", "/bin/sh", "-c", "exit 7"]);
    assert_eq!(output.status.code(), Some(7));
}

#[test]
fn command_stdio_is_inherited() {
    let output = run_wrapper(&["--", "/bin/echo", "through the helper"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(output.stdout, b"through the helper\n");
}

#[test]
fn signal_death_maps_to_128_plus_signal() {
    let output = run_wrapper(&["--", "/bin/sh", "-c", "kill -TERM $$"]);
    assert_eq!(output.status.code(), Some(143));
}

#[test]
fn unlaunchable_command_exits_with_the_spawn_failure_code() {
    let output = run_wrapper(&["--", "/nonexistent/tool"]);
    assert_eq!(output.status.code(), Some(107));
    assert!(!output.stderr.is_empty(), "the launch error must be reported");
}

// =============================================================================
// Timeout enforcement
// =============================================================================

#[test]
fn timeout_terminates_a_compliant_command() {
    let started = Instant::now();
    let output = run_wrapper(&["--timeout=1", "--kill_delay=2", "--", "/bin/sleep", "10"]);
    let elapsed = started.elapsed();

    assert_eq!(output.status.code(), Some(143));
    assert!(elapsed >= Duration::from_secs(1), "terminated early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(3), "kill delay consumed needlessly: {:?}", elapsed);
}

#[test]
fn kill_delay_bounds_a_signal_ignoring_command() {
    let started = Instant::now();
    let output = run_wrapper(&[
        "--timeout=1",
        "--kill_delay=1",
        "--",
        "/bin/sh",
        "-c",
        "trap '' TERM; while :; do /bin/sleep 0.1 || :; done",
    ]);
    let elapsed = started.elapsed();

    assert_eq!(output.status.code(), Some(137));
    assert!(elapsed >= Duration::from_secs(2), "killed before the delay: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(4), "escalation too slow: {:?}", elapsed);
}

// =============================================================================
// Statistics sidecar
// =============================================================================

#[test]
fn statistics_are_written_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let stats = dir.path().join("stats.json");
    let stats_flag = format!("--stats={}", stats.display());

    let output = run_wrapper(&[&stats_flag, "--", "/bin/sh", "-c", ":"]);
    assert_eq!(output.status.code(), Some(0));

    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&stats).unwrap()).unwrap();
    for field in ["user_time_us", "system_time_us", "max_rss_kib"] {
        assert!(
            parsed.get(field).and_then(serde_json::Value::as_u64).is_some(),
            "missing or non-integer field {field}: {parsed}"
        );
    }
}

#[test]
fn statistics_cover_the_timed_out_command_too() {
    let dir = tempfile::tempdir().unwrap();
    let stats = dir.path().join("stats.json");
    let stats_flag = format!("--stats={}", stats.display());

    let output =
        run_wrapper(&["--timeout=1", "--kill_delay=1", &stats_flag, "--", "/bin/sleep", "10"]);
    assert_eq!(output.status.code(), Some(143));
    assert!(stats.exists(), "the sidecar must be written on the timeout path as well");
}

// =============================================================================
// Usage errors
// =============================================================================

#[test]
fn missing_separator_is_a_usage_error() {
    let output = run_wrapper(&["/bin/echo", "hi"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("usage"));
}

#[test]
fn empty_command_is_a_usage_error() {
    let output = run_wrapper(&["--timeout=1", "--"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn unknown_flags_are_rejected() {
    let output = run_wrapper(&["--frobnicate", "--", "/bin/echo", "hi"]);
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn malformed_timeout_values_are_rejected() {
    for arg in ["--timeout=abc", "--timeout=-3", "--kill_delay="] {
        let output = run_wrapper(&[arg, "--", "/bin/echo", "hi"]);
        assert_eq!(output.status.code(), Some(2), "{arg} must be rejected");
    }
}

#[test]
fn flag_like_arguments_after_the_separator_reach_the_command() {
    let output = run_wrapper(&["--", "/bin/echo", "--timeout=9"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(output.stdout, b"--timeout=9\n");
}
