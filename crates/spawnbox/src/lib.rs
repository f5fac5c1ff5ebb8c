//! Spawnbox: hermetic execution of build-action spawns.
//!
//! A spawn describes one external command: executable, arguments, environment,
//! declared inputs and outputs, and an optional timeout. This crate runs it
//! inside a fresh per-invocation symlink sandbox, delegates timeout and
//! kill-delay enforcement to the external `spawnbox-wrapper` helper, validates
//! declared outputs after exit, and returns a classified result with captured
//! output streams and optional resource-usage statistics.

#![forbid(unsafe_code)]
// Library documentation is in progress. Public API types have docs;
// internal types will be documented in future releases.
#![allow(missing_docs)]

pub mod env;
pub mod manifest;
pub mod model;
pub mod runner;
pub mod sandbox;
pub mod wrapper;

pub use crate::model::*;

pub mod run {
    use super::model::{ExecutionPolicy, ExecutionResult, Spawn};
    use super::runner::{select_runner, RunnerOptions};

    /// Run one spawn with a freshly probed strategy and a default policy.
    pub fn run_spawn(spawn: &Spawn, options: RunnerOptions) -> ExecutionResult {
        run_spawn_with_policy(spawn, &ExecutionPolicy::default(), options)
    }

    /// Run one spawn with a freshly probed strategy and the given policy.
    pub fn run_spawn_with_policy(
        spawn: &Spawn,
        policy: &ExecutionPolicy,
        options: RunnerOptions,
    ) -> ExecutionResult {
        let runner = select_runner(options);
        runner.execute(spawn, policy)
    }
}
