//! Sandboxed execution strategy.
//!
//! Every spawn runs inside an ephemeral symlink sandbox: declared inputs
//! are linked in, the command runs under the helper with its working
//! directory set to the sandbox execroot, declared outputs are validated
//! and published back, and the tree is torn down. Failures on any path
//! still tear down unless retention is configured.

use crate::env::{product_env_prefix, provider_for_os, LocalEnvProvider};
use crate::model::{
    ExecutionPolicy, ExecutionResult, Spawn, SpawnStage, SpawnStatus,
};
use crate::runner::execute::{run_supervised, Invocation, Supervision};
use crate::runner::{
    classify, error_result, supervision_bound, RunnerOptions, RunnerResult, SpawnRunner,
};
use crate::sandbox::{input_map, SandboxLayout, SymlinkedSandbox, TeardownGuard};
use crate::wrapper::{discover_wrapper, statistics_or_none, WrapperCommandLine};
use std::path::PathBuf;
use std::time::Instant;
use tracing::debug;

/// Spawns carrying this tag ask to run outside the sandbox.
pub const NO_SANDBOX_TAG: &str = "no-sandbox";

pub struct SandboxedSpawnRunner {
    options: RunnerOptions,
    wrapper: PathBuf,
    env_provider: Box<dyn LocalEnvProvider>,
    marker_key: String,
}

impl SandboxedSpawnRunner {
    /// Probe for the helper once; without it this strategy does not exist.
    pub fn new(options: RunnerOptions) -> RunnerResult<Self> {
        let wrapper = discover_wrapper(options.wrapper.as_deref())?;
        let env_provider = provider_for_os(
            std::env::consts::OS,
            &options.product_name,
            &options.client_env,
        );
        let marker_key = format!("{}_SANDBOX", product_env_prefix(&options.product_name));
        Ok(Self {
            options,
            wrapper,
            env_provider,
            marker_key,
        })
    }

    fn run_sandboxed(
        &self,
        spawn: &Spawn,
        policy: &ExecutionPolicy,
    ) -> RunnerResult<ExecutionResult> {
        policy.report(SpawnStage::Materializing);
        let layout = SandboxLayout::allocate(&self.options.sandbox_base, &self.options.execroot)?;
        let mut guard = TeardownGuard::new(layout.root().to_path_buf());
        let inputs = input_map(spawn, policy, &self.options.execroot)?;
        let sandbox = SymlinkedSandbox::materialize(layout, &inputs, spawn.outputs())?;

        let mut env = self.env_provider.rewrite(
            spawn.environment(),
            sandbox.layout().execroot(),
            sandbox.layout().scratch(),
        );
        env.insert(self.marker_key.clone(), "1".to_string());

        let timeout = policy.effective_timeout(spawn);
        let stats_path = self
            .options
            .collect_statistics
            .then(|| sandbox.layout().statistics_file().to_path_buf());
        let argv = WrapperCommandLine::new(&self.wrapper)
            .timeout(timeout)
            .kill_delay(timeout.map(|_| self.options.kill_delay))
            .statistics_path(stats_path.clone())
            .command(spawn.command().iter().cloned())
            .build();

        policy.report(SpawnStage::Running);
        debug!(
            mnemonic = spawn.mnemonic(),
            sandbox = %sandbox.layout().root().display(),
            "running spawn in sandbox"
        );
        let raw = run_supervised(
            Invocation {
                argv,
                cwd: sandbox.layout().execroot().to_path_buf(),
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
            sandbox.missing_outputs()
        };
        if !timed_out && raw.exit_code == 0 {
            sandbox.publish_outputs(&self.options.execroot)?;
        }

        let status = classify(timed_out, raw.exit_code, &missing);
        let retained_sandbox =
            (status.is_failure() && self.options.retain_on_failure).then(|| guard.keep());
        Ok(ExecutionResult {
            status,
            exit_code: Some(raw.exit_code),
            timed_out,
            wall_time: raw.wall_time,
            stdout: raw.stdout,
            stderr: raw.stderr,
            statistics,
            missing_outputs: missing,
            failure: None,
            retained_sandbox,
        })
    }
}

impl SpawnRunner for SandboxedSpawnRunner {
    fn name(&self) -> &'static str {
        "sandboxed"
    }

    fn supports(&self, spawn: &Spawn) -> bool {
        !spawn.tags().contains_key(NO_SANDBOX_TAG)
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
        if !self.supports(spawn) {
            return ExecutionResult::failed(
                SpawnStatus::Unsupported,
                format!("spawn is tagged '{NO_SANDBOX_TAG}'"),
                started.elapsed(),
            );
        }
        match self.run_sandboxed(spawn, policy) {
            Ok(result) => result,
            Err(err) => {
                debug!(%err, mnemonic = spawn.mnemonic(), "sandboxed execution failed");
                error_result(&err, started.elapsed())
            }
        }
    }
}
