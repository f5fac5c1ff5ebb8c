//! Spawn runner strategies and their shared error model.
//!
//! A strategy is probed once at startup via [`select_runner`] and then used
//! for every spawn; each `execute` call blocks its thread, owns a disjoint
//! sandbox subtree, and shares nothing mutable with concurrent calls.

use crate::model::{ExecutionPolicy, ExecutionResult, Spawn, SpawnStatus};
use miette::Diagnostic;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

mod execute;
pub mod local;
pub mod sandboxed;

pub use local::LocalSpawnRunner;
pub use sandboxed::SandboxedSpawnRunner;

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Kill-delay grace applied when the caller does not configure one.
pub const DEFAULT_KILL_DELAY: Duration = Duration::from_secs(15);
/// Product name used for environment markers when none is configured.
pub const DEFAULT_PRODUCT_NAME: &str = "spawnbox";

// =============================================================================
// Error model
// =============================================================================

/// Stable classification for runner errors. `Statistics` never surfaces to
/// callers; a failed sidecar parse only downgrades the result's statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    Unsupported,
    SandboxSetup,
    Execution,
    Timeout,
    MissingOutputs,
    Cancelled,
    Statistics,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unsupported => "E_UNSUPPORTED",
            Self::SandboxSetup => "E_SANDBOX_SETUP",
            Self::Execution => "E_EXECUTION",
            Self::Timeout => "E_TIMEOUT",
            Self::MissingOutputs => "E_MISSING_OUTPUTS",
            Self::Cancelled => "E_CANCELLED",
            Self::Statistics => "E_STATISTICS",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "E_UNSUPPORTED" => Some(Self::Unsupported),
            "E_SANDBOX_SETUP" => Some(Self::SandboxSetup),
            "E_EXECUTION" => Some(Self::Execution),
            "E_TIMEOUT" => Some(Self::Timeout),
            "E_MISSING_OUTPUTS" => Some(Self::MissingOutputs),
            "E_CANCELLED" => Some(Self::Cancelled),
            "E_STATISTICS" => Some(Self::Statistics),
            _ => None,
        }
    }

    /// Result classification an error of this code collapses to.
    pub fn status(self) -> SpawnStatus {
        match self {
            Self::Unsupported => SpawnStatus::Unsupported,
            Self::Execution => SpawnStatus::ExitFailure,
            Self::Timeout => SpawnStatus::Timeout,
            Self::MissingOutputs => SpawnStatus::MissingOutputs,
            Self::Cancelled => SpawnStatus::Cancelled,
            Self::SandboxSetup | Self::Statistics => SpawnStatus::SetupFailure,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error with a stable code, a human message, and optional JSON context
/// carrying details and a `fix` hint.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RunnerError {
    pub code: ErrorCode,
    pub message: String,
    pub context: Option<Value>,
}

impl RunnerError {
    pub fn unsupported(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code: ErrorCode::Unsupported,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn setup(message: impl Into<String>, context: impl Into<Option<Value>>) -> Self {
        Self {
            code: ErrorCode::SandboxSetup,
            message: message.into(),
            context: context.into(),
        }
    }

    pub fn io(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self {
            code: ErrorCode::SandboxSetup,
            message: message.into(),
            context: Some(serde_json::json!({ "source": err.to_string() })),
        }
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Cancelled,
            message: message.into(),
            context: None,
        }
    }

    pub fn statistics(message: impl Into<String>, err: impl fmt::Display) -> Self {
        Self {
            code: ErrorCode::Statistics,
            message: message.into(),
            context: Some(serde_json::json!({ "source": err.to_string() })),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.code {
            ErrorCode::Execution | ErrorCode::Statistics => 1,
            ErrorCode::SandboxSetup => 2,
            ErrorCode::MissingOutputs => 3,
            ErrorCode::Unsupported => 4,
            ErrorCode::Timeout => 124,
            ErrorCode::Cancelled => 130,
        }
    }
}

impl Diagnostic for RunnerError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(self.code))
    }
}

// =============================================================================
// Runner configuration and strategy selection
// =============================================================================

/// Read-only configuration shared by every invocation of one runner.
#[derive(Clone, Debug)]
pub struct RunnerOptions {
    /// Root the spawn's relative input and output paths resolve against.
    pub execroot: PathBuf,
    /// Shared base under which per-invocation sandboxes are allocated.
    pub sandbox_base: PathBuf,
    /// Explicit helper path; when absent the helper is discovered next to
    /// the current executable and then on `PATH`.
    pub wrapper: Option<PathBuf>,
    /// Grace between the helper's SIGTERM at the timeout and its SIGKILL.
    pub kill_delay: Duration,
    pub collect_statistics: bool,
    /// Keep the sandbox directory of a failed spawn for inspection.
    pub retain_on_failure: bool,
    /// Names the environment markers injected into sandboxed processes.
    pub product_name: String,
    /// Snapshot of the invoking environment, consulted by env providers.
    pub client_env: BTreeMap<String, String>,
}

impl RunnerOptions {
    pub fn new(execroot: impl Into<PathBuf>, sandbox_base: impl Into<PathBuf>) -> Self {
        Self {
            execroot: execroot.into(),
            sandbox_base: sandbox_base.into(),
            wrapper: None,
            kill_delay: DEFAULT_KILL_DELAY,
            collect_statistics: false,
            retain_on_failure: false,
            product_name: DEFAULT_PRODUCT_NAME.to_string(),
            client_env: std::env::vars().collect(),
        }
    }
}

/// Capability set every execution strategy implements.
pub trait SpawnRunner: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy will attempt the given spawn at all. A declined
    /// spawn is reported as `Unsupported`, never attempted partially.
    fn supports(&self, spawn: &Spawn) -> bool;

    /// Run the spawn to completion, blocking the calling thread. Always
    /// returns a classified result; errors are folded into it.
    fn execute(&self, spawn: &Spawn, policy: &ExecutionPolicy) -> ExecutionResult;
}

/// Probe the platform once and pick a strategy: sandboxed when the helper is
/// available, otherwise the local fallback.
pub fn select_runner(options: RunnerOptions) -> Box<dyn SpawnRunner> {
    if cfg!(unix) {
        match SandboxedSpawnRunner::new(options.clone()) {
            Ok(runner) => return Box::new(runner),
            Err(err) => debug!(%err, "sandboxed strategy unavailable, falling back to local"),
        }
    }
    Box::new(LocalSpawnRunner::new(options))
}

// =============================================================================
// Shared classification helpers
// =============================================================================

/// Bound on the helper's own lifetime: past it the helper is presumed hung
/// and the invocation becomes a setup failure, not a timeout.
pub(crate) fn supervision_bound(timeout: Option<Duration>, kill_delay: Duration) -> Option<Duration> {
    timeout.map(|limit| limit + kill_delay + execute::SUPERVISION_GRACE)
}

/// Precedence: timeout, then nonzero exit, then missing outputs.
pub(crate) fn classify(timed_out: bool, exit_code: i32, missing: &[PathBuf]) -> SpawnStatus {
    if timed_out {
        SpawnStatus::Timeout
    } else if exit_code != 0 {
        SpawnStatus::ExitFailure
    } else if missing.is_empty() {
        SpawnStatus::Success
    } else {
        SpawnStatus::MissingOutputs
    }
}

pub(crate) fn error_result(err: &RunnerError, wall_time: Duration) -> ExecutionResult {
    ExecutionResult::failed(err.code.status(), err.to_string(), wall_time)
}

/// Declared outputs absent under `root`, sorted by their relative path.
pub(crate) fn absent_outputs<'a>(
    outputs: impl IntoIterator<Item = &'a PathBuf>,
    root: &Path,
) -> Vec<PathBuf> {
    outputs
        .into_iter()
        .filter(|rel| {
            let path = root.join(rel);
            !(path.exists() || path.is_symlink())
        })
        .cloned()
        .collect()
}
