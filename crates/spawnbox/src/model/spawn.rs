//! The immutable description of one external command to run.

use crate::runner::{RunnerError, RunnerResult};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Mnemonic used when the caller does not provide one.
pub const DEFAULT_MNEMONIC: &str = "Spawn";

/// One external command with its declared environment, inputs, outputs and
/// timeout. Created once per build action via [`SpawnBuilder`] and never
/// mutated afterwards; input and output paths are relative to the execution
/// root the runner is configured with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spawn {
    command: Vec<String>,
    environment: BTreeMap<String, String>,
    inputs: BTreeSet<PathBuf>,
    outputs: BTreeSet<PathBuf>,
    timeout: Option<Duration>,
    mnemonic: String,
    tags: BTreeMap<String, String>,
}

impl Spawn {
    /// Start building a spawn for `program`.
    pub fn builder(program: impl Into<String>) -> SpawnBuilder {
        SpawnBuilder::new(program)
    }

    /// Executable followed by its arguments. Never empty.
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// The executable, i.e. the first element of [`Spawn::command`].
    pub fn program(&self) -> &str {
        self.command.first().map_or("", String::as_str)
    }

    /// Declared environment overrides, before provider rewriting.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Execroot-relative paths the command reads.
    pub fn inputs(&self) -> &BTreeSet<PathBuf> {
        &self.inputs
    }

    /// Execroot-relative paths the command must produce.
    pub fn outputs(&self) -> &BTreeSet<PathBuf> {
        &self.outputs
    }

    /// Wall-clock limit, if any. A policy may override it per invocation.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Short action-kind label used in logs.
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    /// Free-form execution metadata, e.g. the `no-sandbox` opt-out tag.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }
}

/// Builder validating the spawn invariants: a non-empty command and strictly
/// relative input/output paths.
#[derive(Clone, Debug)]
pub struct SpawnBuilder {
    command: Vec<String>,
    environment: BTreeMap<String, String>,
    inputs: BTreeSet<PathBuf>,
    outputs: BTreeSet<PathBuf>,
    timeout: Option<Duration>,
    mnemonic: String,
    tags: BTreeMap<String, String>,
}

impl SpawnBuilder {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            command: vec![program.into()],
            environment: BTreeMap::new(),
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            timeout: None,
            mnemonic: DEFAULT_MNEMONIC.to_string(),
            tags: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.command.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn input(mut self, path: impl Into<PathBuf>) -> Self {
        self.inputs.insert(path.into());
        self
    }

    #[must_use]
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.insert(path.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn mnemonic(mut self, mnemonic: impl Into<String>) -> Self {
        self.mnemonic = mnemonic.into();
        self
    }

    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Validate and freeze the spawn.
    pub fn build(self) -> RunnerResult<Spawn> {
        if self.command.first().map(|program| program.is_empty()).unwrap_or(true) {
            return Err(RunnerError::setup(
                "spawn command must name an executable",
                Some(json!({
                    "fix": "pass a non-empty program name to Spawn::builder",
                })),
            ));
        }
        for path in self.inputs.iter().chain(self.outputs.iter()) {
            validate_relative(path)?;
        }
        Ok(Spawn {
            command: self.command,
            environment: self.environment,
            inputs: self.inputs,
            outputs: self.outputs,
            timeout: self.timeout,
            mnemonic: self.mnemonic,
            tags: self.tags,
        })
    }
}

fn validate_relative(path: &Path) -> RunnerResult<()> {
    if path.is_absolute() {
        return Err(RunnerError::setup(
            "declared paths must be relative to the execroot",
            Some(json!({
                "path": path.display().to_string(),
                "fix": "strip the execroot prefix; the runner resolves relative paths itself",
            })),
        ));
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(RunnerError::setup(
            "declared paths must not escape the execroot",
            Some(json!({
                "path": path.display().to_string(),
                "fix": "remove `..` components from the declared path",
            })),
        ));
    }
    Ok(())
}
