// Test module - relaxed lint rules
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(missing_docs)]

//! Timeout and kill-delay enforcement tests
//!
//! Exercises the helper's termination contract through both strategies:
//! graceful termination at the timeout, forced kill after the delay for
//! signal-ignoring commands, and prompt cancellation mid-flight.

use spawnbox::model::{ExecutionPolicy, SpawnBuilder, SpawnStatus};
use spawnbox::runner::{LocalSpawnRunner, RunnerOptions, SandboxedSpawnRunner, SpawnRunner};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

// =============================================================================
// Helper Functions
// =============================================================================

fn workspace() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().expect("temp dir");
    let execroot = dir.path().join("workspace");
    let sandbox_base = dir.path().join("sandboxes");
    std::fs::create_dir_all(&execroot).expect("execroot");
    std::fs::create_dir_all(&sandbox_base).expect("sandbox base");
    (dir, execroot, sandbox_base)
}

fn test_options(execroot: &Path, sandbox_base: &Path) -> RunnerOptions {
    let mut options = RunnerOptions::new(execroot, sandbox_base);
    options.wrapper = Some(PathBuf::from(env!("CARGO_BIN_EXE_spawnbox-wrapper")));
    options
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}

// =============================================================================
// Timeout classification
// =============================================================================

#[test]
fn sleeping_command_times_out_within_the_contract_window() {
    let (_guard, execroot, base) = workspace();
    let mut options = test_options(&execroot, &base);
    options.kill_delay = Duration::from_secs(2);
    let runner = SandboxedSpawnRunner::new(options).expect("helper discoverable");
    let spawn = SpawnBuilder::new("/bin/sleep")
        .arg("5")
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    let result = runner.execute(&spawn, &ExecutionPolicy::new());

    assert_eq!(result.status, SpawnStatus::Timeout, "failure: {:?}", result.failure);
    assert!(result.timed_out);
    assert!(
        result.wall_time >= Duration::from_secs(1),
        "wall time {:?} must reach the timeout",
        result.wall_time
    );
    assert!(
        result.wall_time < Duration::from_secs(3),
        "sleep honors SIGTERM, so the kill delay must not be consumed: {:?}",
        result.wall_time
    );
    assert_eq!(result.exit_code, Some(143), "terminated by SIGTERM");
}

#[test]
fn signal_ignoring_command_is_force_killed_after_the_delay() {
    let (guard, execroot, base) = workspace();
    let heartbeat = guard.path().join("beat.txt");
    let mut options = test_options(&execroot, &base);
    options.kill_delay = Duration::from_secs(1);
    let runner = SandboxedSpawnRunner::new(options).expect("helper discoverable");
    let spawn = SpawnBuilder::new("/bin/sh")
        .arg("-c")
        .arg("trap '' TERM; while :; do printf x >> \"$HEARTBEAT\"; /bin/sleep 0.1 || :; done")
        .env("HEARTBEAT", heartbeat.display().to_string())
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    let started = Instant::now();
    let result = runner.execute(&spawn, &ExecutionPolicy::new());

    assert_eq!(result.status, SpawnStatus::Timeout);
    assert_eq!(result.exit_code, Some(137), "SIGKILL is not ignorable");
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "force kill must land near timeout + kill delay, took {:?}",
        started.elapsed()
    );

    // Nothing may outlive the invocation: the heartbeat file stops growing.
    let len_after_return = file_len(&heartbeat);
    thread::sleep(Duration::from_millis(600));
    assert_eq!(
        file_len(&heartbeat),
        len_after_return,
        "a surviving process kept writing after the run returned"
    );
}

#[test]
fn policy_timeout_overrides_the_spawn_timeout() {
    let (_guard, execroot, base) = workspace();
    let mut options = test_options(&execroot, &base);
    options.kill_delay = Duration::from_secs(1);
    let runner = SandboxedSpawnRunner::new(options).expect("helper discoverable");
    let spawn = SpawnBuilder::new("/bin/sleep")
        .arg("5")
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap();
    let mut policy = ExecutionPolicy::new();
    policy.timeout = Some(Duration::from_secs(1));

    let result = runner.execute(&spawn, &policy);

    assert_eq!(result.status, SpawnStatus::Timeout);
    assert!(result.wall_time < Duration::from_secs(3));
}

#[test]
fn local_strategy_honors_the_same_timeout_contract() {
    let (_guard, execroot, base) = workspace();
    let mut options = test_options(&execroot, &base);
    options.kill_delay = Duration::from_secs(1);
    let runner = LocalSpawnRunner::new(options);
    let spawn = SpawnBuilder::new("/bin/sleep")
        .arg("5")
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    let result = runner.execute(&spawn, &ExecutionPolicy::new());

    assert_eq!(result.status, SpawnStatus::Timeout, "failure: {:?}", result.failure);
    assert!(result.timed_out);
    assert!(result.wall_time >= Duration::from_secs(1));
    assert!(result.wall_time < Duration::from_secs(3));
}

#[test]
fn command_finishing_before_the_timeout_is_not_a_timeout() {
    let (_guard, execroot, base) = workspace();
    let runner = SandboxedSpawnRunner::new(test_options(&execroot, &base)).expect("helper");
    let spawn = SpawnBuilder::new("/bin/echo")
        .arg("quick")
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap();

    let result = runner.execute(&spawn, &ExecutionPolicy::new());

    assert_eq!(result.status, SpawnStatus::Success);
    assert!(!result.timed_out);
    assert!(result.wall_time < Duration::from_secs(5));
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn cancellation_terminates_a_running_spawn_promptly() {
    let (_guard, execroot, base) = workspace();
    let runner = SandboxedSpawnRunner::new(test_options(&execroot, &base)).expect("helper");
    let spawn = SpawnBuilder::new("/bin/sleep").arg("20").build().unwrap();
    let policy = ExecutionPolicy::new();

    let cancel = policy.cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        cancel.cancel();
    });

    let started = Instant::now();
    let result = runner.execute(&spawn, &policy);
    canceller.join().unwrap();

    assert_eq!(result.status, SpawnStatus::Cancelled);
    assert_eq!(result.exit_code, None);
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "cancellation took {:?}",
        started.elapsed()
    );
    assert_eq!(
        std::fs::read_dir(&base).unwrap().count(),
        0,
        "cancelled sandbox must be torn down"
    );
}

#[test]
fn cancellation_reaches_signal_ignoring_commands() {
    let (guard, execroot, base) = workspace();
    let heartbeat = guard.path().join("beat.txt");
    let runner = SandboxedSpawnRunner::new(test_options(&execroot, &base)).expect("helper");
    let spawn = SpawnBuilder::new("/bin/sh")
        .arg("-c")
        .arg("trap '' TERM; while :; do printf x >> \"$HEARTBEAT\"; /bin/sleep 0.1 || :; done")
        .env("HEARTBEAT", heartbeat.display().to_string())
        .build()
        .unwrap();
    let policy = ExecutionPolicy::new();

    let cancel = policy.cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        cancel.cancel();
    });

    let started = Instant::now();
    let result = runner.execute(&spawn, &policy);
    canceller.join().unwrap();

    assert_eq!(result.status, SpawnStatus::Cancelled);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "escalation must not hang: {:?}",
        started.elapsed()
    );

    let len_after_return = file_len(&heartbeat);
    thread::sleep(Duration::from_millis(600));
    assert_eq!(
        file_len(&heartbeat),
        len_after_return,
        "a surviving process kept writing after cancellation"
    );
}
