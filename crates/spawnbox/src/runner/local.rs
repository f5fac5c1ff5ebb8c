//! Non-sandboxed fallback strategy.
//!
//! Runs the command directly in the real execroot, still under the helper
//! when one is available so the timeout and kill-delay contract stays
//! identical. Without a helper, spawns that carry a timeout are declined
//! rather than approximated in-process.

use crate::env::{provider_for_os, LocalEnvProvider};
use crate::model::{
    ExecutionPolicy, ExecutionResult, Spawn, SpawnStage, SpawnStatus,
};
use crate::runner::execute::{run_supervised, Invocation, Supervision};
use crate::runner::{
    absent_outputs, classify, error_result, supervision_bound, RunnerOptions, RunnerResult,
    SpawnRunner,
};
use crate::wrapper::{discover_wrapper, statistics_or_none, WrapperCommandLine};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Instant;
use tracing::debug;

pub struct LocalSpawnRunner {
    options: RunnerOptions,
    wrapper: Option<PathBuf>,
    env_provider: Box<dyn LocalEnvProvider>,
}

impl LocalSpawnRunner {
    pub fn new(options: RunnerOptions) -> Self {
        let wrapper = discover_wrapper(options.wrapper.as_deref()).ok();
        if wrapper.is_none() {
            debug!("local runner has no helper; spawns with timeouts will be declined");
        }
        let env_provider = provider_for_os(
            std::env::consts::OS,
            &options.product_name,
            &options.client_env,
        );
        Self {
            options,
            wrapper,
            env_provider,
        }
    }

    fn run_local(&self, spawn: &Spawn, policy: &ExecutionPolicy) -> RunnerResult<ExecutionResult> {
        let timeout = policy.effective_timeout(spawn);
        if timeout.is_some() && self.wrapper.is_none() {
            return Ok(ExecutionResult::failed(
                SpawnStatus::Unsupported,
                "timeouts require the helper, which was not found",
                std::time::Duration::ZERO,
            ));
        }

        policy.report(SpawnStage::Materializing);
        let scratch = tempfile::Builder::new()
            .prefix("spawnbox-local-")
            .tempdir()
            .map_err(|err| {
                crate::runner::RunnerError::io("could not create a scratch directory", err)
            })?;
        let env = self.env_provider.rewrite(
            spawn.environment(),
            &self.options.execroot,
            scratch.path(),
        );

        let stats_path = (self.options.collect_statistics && self.wrapper.is_some())
            .then(|| scratch.path().join("stats.json"));
        let argv = match &self.wrapper {
            Some(wrapper) => WrapperCommandLine::new(wrapper)
                .timeout(timeout)
                .kill_delay(timeout.map(|_| self.options.kill_delay))
                .statistics_path(stats_path.clone())
                .command(spawn.command().iter().cloned())
                .build(),
            None => spawn.command().iter().map(OsString::from).collect(),
        };

        policy.report(SpawnStage::Running);
        debug!(mnemonic = spawn.mnemonic(), "running spawn without a sandbox");
        let raw = run_supervised(
            Invocation {
                argv,
                cwd: self.options.execroot.clone(),
                env,
            },
            &Supervision {
                cancel: &policy.cancel,
                bound: supervision_bound(timeout, self.options.kill_delay),
            },
        )?;

        policy.report(SpawnStage::Validating);
        let timed_out = timeout.is_some_and(|limit| raw.wall_time >= limit);
        let statistics = stats_path.as_deref().and_then(statistics_or_none);
        let missing = if timed_out || raw.exit_code != 0 {
            Vec::new()
        } else {
            absent_outputs(spawn.outputs().iter(), &self.options.execroot)
        };

        Ok(ExecutionResult {
            status: classify(timed_out, raw.exit_code, &missing),
            exit_code: Some(raw.exit_code),
            timed_out,
            wall_time: raw.wall_time,
            stdout: raw.stdout,
            stderr: raw.stderr,
            statistics,
            missing_outputs: missing,
            failure: None,
            retained_sandbox: None,
        })
    }
}

impl SpawnRunner for LocalSpawnRunner {
    fn name(&self) -> &'static str {
        "local"
    }

    fn supports(&self, spawn: &Spawn) -> bool {
        self.wrapper.is_some() || spawn.timeout().is_none()
    }

    fn execute(&self, spawn: &Spawn, policy: &ExecutionPolicy) -> ExecutionResult {
        let started = Instant::now();
        if policy.cancel.is_cancelled() {
            return ExecutionResult::failed(
                SpawnStatus::Cancelled,
                "spawn cancelled before setup",
                started.elapsed(),
            );
        }
        match self.run_local(spawn, policy) {
            Ok(result) => result,
            Err(err) => {
                debug!(%err, mnemonic = spawn.mnemonic(), "local execution failed");
                error_result(&err, started.elapsed())
            }
        }
    }
}
