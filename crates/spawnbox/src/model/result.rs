//! Classified outcome of one executed spawn.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Terminal classification of a spawn. Exactly one applies per invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnStatus {
    /// Process exited zero and produced every declared output.
    Success,
    /// Process ran to completion but exited nonzero.
    ExitFailure,
    /// The helper terminated the process at the timeout/kill-delay bound.
    Timeout,
    /// Process exited zero but at least one declared output is absent.
    MissingOutputs,
    /// The sandbox or the helper could not be set up or supervised.
    SetupFailure,
    /// The caller cancelled the invocation mid-flight.
    Cancelled,
    /// The selected strategy declined this spawn before attempting it.
    Unsupported,
}

impl SpawnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ExitFailure => "exit_failure",
            Self::Timeout => "timeout",
            Self::MissingOutputs => "missing_outputs",
            Self::SetupFailure => "setup_failure",
            Self::Cancelled => "cancelled",
            Self::Unsupported => "unsupported",
        }
    }

    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Success)
    }
}

impl fmt::Display for SpawnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource usage of the finished process tree, parsed from the helper's
/// statistics sidecar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub user_time: Duration,
    pub system_time: Duration,
    pub max_rss_kib: u64,
}

/// Immutable outcome of one `execute` call.
///
/// `exit_code` is the helper's reported code (128 + signal when the command
/// died to a signal) and is absent when the process never ran. Captured
/// streams are raw bytes; callers decide how to render them.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub status: SpawnStatus,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub wall_time: Duration,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub statistics: Option<ResourceUsage>,
    pub missing_outputs: Vec<PathBuf>,
    pub failure: Option<String>,
    pub retained_sandbox: Option<PathBuf>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == SpawnStatus::Success
    }

    /// Result for an invocation that never reached the process, e.g. setup
    /// failure, early cancellation or an unsupported spawn.
    pub fn failed(status: SpawnStatus, message: impl Into<String>, wall_time: Duration) -> Self {
        Self {
            status,
            exit_code: None,
            timed_out: false,
            wall_time,
            stdout: Vec::new(),
            stderr: Vec::new(),
            statistics: None,
            missing_outputs: Vec::new(),
            failure: Some(message.into()),
            retained_sandbox: None,
        }
    }

    /// One-line summary for logs and human CLI output.
    pub fn exit_summary(&self) -> String {
        match (self.status, self.exit_code) {
            (SpawnStatus::Success, _) => "success".to_string(),
            (status, Some(code)) => format!("{status} (exit code {code})"),
            (status, None) => status.to_string(),
        }
    }
}
