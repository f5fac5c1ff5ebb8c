//! Sandbox directory lifecycle.
//!
//! Each invocation gets an ephemeral tree under the shared sandbox base:
//!
//! ```text
//! <sandbox-base>/<uuid>/
//!   execroot/<basename-of-real-execroot>/   inputs as symlinks, outputs written here
//!   execroot/<basename>/tmp/                scratch, exported as TMPDIR
//!   stats.json                              helper statistics sidecar
//! ```
//!
//! The uuid makes concurrent allocations collision-free without locking.
//! [`TeardownGuard`] removes the whole tree on drop unless the caller
//! decided to retain it.

use crate::model::{ExecutionPolicy, Spawn};
use crate::runner::{absent_outputs, RunnerError, RunnerResult};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};
use uuid::Uuid;

const STATS_FILE: &str = "stats.json";
const SCRATCH_DIR: &str = "tmp";

/// Paths of one sandbox allocation. Pure path math; nothing is created
/// until [`SymlinkedSandbox::materialize`].
#[derive(Clone, Debug)]
pub struct SandboxLayout {
    root: PathBuf,
    execroot: PathBuf,
    scratch: PathBuf,
    stats: PathBuf,
}

impl SandboxLayout {
    pub fn allocate(sandbox_base: &Path, real_execroot: &Path) -> RunnerResult<Self> {
        let basename = real_execroot.file_name().ok_or_else(|| {
            RunnerError::setup(
                format!(
                    "execroot '{}' has no base name to mirror",
                    real_execroot.display()
                ),
                serde_json::json!({
                    "fix": "use an execroot below the filesystem root, e.g. /work/myproject",
                }),
            )
        })?;
        let root = sandbox_base.join(Uuid::new_v4().to_string());
        let execroot = root.join("execroot").join(basename);
        let scratch = execroot.join(SCRATCH_DIR);
        let stats = root.join(STATS_FILE);
        Ok(Self {
            root,
            execroot,
            scratch,
            stats,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn execroot(&self) -> &Path {
        &self.execroot
    }

    pub fn scratch(&self) -> &Path {
        &self.scratch
    }

    pub fn statistics_file(&self) -> &Path {
        &self.stats
    }
}

/// Resolve the spawn's declared inputs plus the policy's extra inputs into
/// one map of sandbox-relative path to absolute source. Extra inputs win
/// on collision.
pub fn input_map(
    spawn: &Spawn,
    policy: &ExecutionPolicy,
    real_execroot: &Path,
) -> RunnerResult<BTreeMap<PathBuf, PathBuf>> {
    let mut map: BTreeMap<PathBuf, PathBuf> = spawn
        .inputs()
        .iter()
        .map(|rel| (rel.clone(), real_execroot.join(rel)))
        .collect();
    for (rel, source) in &policy.extra_inputs {
        if !source.is_absolute() {
            return Err(RunnerError::setup(
                format!("extra input source '{}' is not absolute", source.display()),
                serde_json::json!({
                    "input": rel.display().to_string(),
                    "fix": "supply extra input sources as absolute paths",
                }),
            ));
        }
        map.insert(rel.clone(), source.clone());
    }
    Ok(map)
}

/// A materialized sandbox: inputs linked in, output parents prepared.
#[derive(Debug)]
pub struct SymlinkedSandbox {
    layout: SandboxLayout,
    outputs: BTreeSet<PathBuf>,
    writable: Vec<PathBuf>,
}

impl SymlinkedSandbox {
    /// Build the tree: scratch dir, one symlink per input, the parent
    /// directory of every declared output. Fails on the first dangling
    /// input source.
    pub fn materialize(
        layout: SandboxLayout,
        inputs: &BTreeMap<PathBuf, PathBuf>,
        outputs: &BTreeSet<PathBuf>,
    ) -> RunnerResult<Self> {
        std::fs::create_dir_all(&layout.scratch).map_err(|err| {
            RunnerError::io(
                format!("could not create sandbox under '{}'", layout.root.display()),
                err,
            )
        })?;
        for (rel, source) in inputs {
            if !(source.exists() || source.is_symlink()) {
                return Err(RunnerError::setup(
                    format!("input '{}' does not exist", rel.display()),
                    serde_json::json!({
                        "source": source.display().to_string(),
                        "fix": "declare only inputs that exist under the execroot",
                    }),
                ));
            }
            let dest = layout.execroot.join(rel);
            create_parent(&dest)?;
            link_input(source, &dest)?;
        }
        for rel in outputs {
            create_parent(&layout.execroot.join(rel))?;
        }
        let writable = vec![layout.execroot.clone(), layout.scratch.clone()];
        debug!(
            sandbox = %layout.root.display(),
            inputs = inputs.len(),
            outputs = outputs.len(),
            "sandbox materialized"
        );
        Ok(Self {
            layout,
            outputs: outputs.clone(),
            writable,
        })
    }

    pub fn layout(&self) -> &SandboxLayout {
        &self.layout
    }

    /// Directories the command may write to.
    pub fn writable_dirs(&self) -> &[PathBuf] {
        &self.writable
    }

    /// Declared outputs the command failed to produce, sorted.
    pub fn missing_outputs(&self) -> Vec<PathBuf> {
        absent_outputs(self.outputs.iter(), &self.layout.execroot)
    }

    /// Move produced outputs out of the sandbox into the real execroot.
    /// Outputs the command did not produce are skipped; the caller reports
    /// them via [`Self::missing_outputs`].
    pub fn publish_outputs(&self, real_execroot: &Path) -> RunnerResult<()> {
        for rel in &self.outputs {
            let produced = self.layout.execroot.join(rel);
            if !(produced.exists() || produced.is_symlink()) {
                continue;
            }
            let dest = real_execroot.join(rel);
            create_parent(&dest)?;
            move_output(&produced, &dest)?;
        }
        Ok(())
    }
}

fn create_parent(path: &Path) -> RunnerResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            RunnerError::io(
                format!("could not create directory '{}'", parent.display()),
                err,
            )
        })?;
    }
    Ok(())
}

#[cfg(unix)]
fn link_input(source: &Path, dest: &Path) -> RunnerResult<()> {
    std::os::unix::fs::symlink(source, dest).map_err(|err| {
        RunnerError::io(
            format!(
                "could not link input '{}' into the sandbox",
                source.display()
            ),
            err,
        )
    })
}

#[cfg(not(unix))]
fn link_input(source: &Path, dest: &Path) -> RunnerResult<()> {
    std::fs::copy(source, dest).map(|_| ()).map_err(|err| {
        RunnerError::io(
            format!(
                "could not copy input '{}' into the sandbox",
                source.display()
            ),
            err,
        )
    })
}

/// Rename first; fall back to copy-and-delete when the sandbox base and
/// the execroot live on different filesystems.
fn move_output(produced: &Path, dest: &Path) -> RunnerResult<()> {
    if std::fs::rename(produced, dest).is_ok() {
        return Ok(());
    }
    std::fs::copy(produced, dest).map_err(|err| {
        RunnerError::io(
            format!("could not publish output '{}'", dest.display()),
            err,
        )
    })?;
    std::fs::remove_file(produced).map_err(|err| {
        RunnerError::io(
            format!(
                "could not remove published output '{}' from the sandbox",
                produced.display()
            ),
            err,
        )
    })
}

/// Removes the sandbox tree on drop. Runs on every exit path, including
/// unwinds; `keep()` opts a failed run's tree out for inspection.
pub struct TeardownGuard {
    root: PathBuf,
    keep: bool,
}

impl TeardownGuard {
    pub fn new(root: PathBuf) -> Self {
        Self { root, keep: false }
    }

    /// Retain the tree and hand back its path for reporting.
    pub fn keep(&mut self) -> PathBuf {
        self.keep = true;
        self.root.clone()
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if self.keep {
            warn!(path = %self.root.display(), "sandbox retained for inspection");
            return;
        }
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => debug!(path = %self.root.display(), "sandbox removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => error!(%err, path = %self.root.display(), "sandbox teardown failed"),
        }
    }
}
