//! Per-invocation execution context supplied by the caller.

use crate::model::spawn::Spawn;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle stages reported while one spawn executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpawnStage {
    /// Sandbox allocation and input symlinking.
    Materializing,
    /// The helper process is running the command.
    Running,
    /// Output validation and statistics collection.
    Validating,
}

impl SpawnStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Materializing => "materializing",
            Self::Running => "running",
            Self::Validating => "validating",
        }
    }
}

impl fmt::Display for SpawnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives stage transitions during `execute`. Implementations must be
/// cheap; they run on the calling thread between lifecycle steps.
pub trait SpawnReporter: Send + Sync {
    fn on_stage(&self, stage: SpawnStage);
}

/// Shared flag a caller trips to abort an in-flight spawn. Cloning yields a
/// handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination of the spawn this token was handed to.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Context for exactly one `execute` call.
///
/// The policy can override the spawn's own timeout, contribute extra input
/// mappings (sandbox-relative path to absolute real path), carry the
/// cancellation token, and observe lifecycle stages.
#[derive(Clone, Default)]
pub struct ExecutionPolicy {
    pub timeout: Option<Duration>,
    pub extra_inputs: BTreeMap<PathBuf, PathBuf>,
    pub cancel: CancelToken,
    pub reporter: Option<Arc<dyn SpawnReporter>>,
}

impl ExecutionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// The policy override wins; otherwise the spawn's own timeout applies.
    pub fn effective_timeout(&self, spawn: &Spawn) -> Option<Duration> {
        self.timeout.or(spawn.timeout())
    }

    pub fn report(&self, stage: SpawnStage) {
        if let Some(reporter) = self.reporter.as_ref() {
            reporter.on_stage(stage);
        }
    }
}

impl fmt::Debug for ExecutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPolicy")
            .field("timeout", &self.timeout)
            .field("extra_inputs", &self.extra_inputs)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("reporter", &self.reporter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn cancel_token_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn policy_timeout_overrides_spawn_timeout() {
        let spawn = Spawn::builder("/bin/true")
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap();
        let mut policy = ExecutionPolicy::new();
        assert_eq!(policy.effective_timeout(&spawn), Some(Duration::from_secs(60)));
        policy.timeout = Some(Duration::from_secs(5));
        assert_eq!(policy.effective_timeout(&spawn), Some(Duration::from_secs(5)));
    }

    #[test]
    fn effective_timeout_absent_when_neither_side_sets_one() {
        let spawn = Spawn::builder("/bin/true").build().unwrap();
        assert_eq!(ExecutionPolicy::new().effective_timeout(&spawn), None);
    }
}
