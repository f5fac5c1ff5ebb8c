//! Command-line model for the supervision helper.
//!
//! The helper is a separate executable with a fixed grammar:
//!
//! ```text
//! <helper> [--timeout=T] [--kill_delay=D] [--stats=<path>] -- <command> <args...>
//! ```
//!
//! Flags appear in exactly that order, durations are integer seconds
//! rounded up, and the `--` separator is always present. This module
//! builds such argvs, locates the helper, and reads the statistics
//! sidecar it leaves behind.

use crate::model::ResourceUsage;
use crate::runner::{RunnerError, RunnerResult};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// File name of the helper binary.
pub const WRAPPER_BIN: &str = "spawnbox-wrapper";

/// Exit code the helper reserves for "the command could not be spawned".
pub const WRAPPER_SPAWN_FAILED: i32 = 107;

/// Builder for a helper invocation.
#[derive(Clone, Debug)]
pub struct WrapperCommandLine {
    wrapper: PathBuf,
    timeout: Option<Duration>,
    kill_delay: Option<Duration>,
    stats: Option<PathBuf>,
    command: Vec<String>,
}

impl WrapperCommandLine {
    pub fn new(wrapper: impl Into<PathBuf>) -> Self {
        Self {
            wrapper: wrapper.into(),
            timeout: None,
            kill_delay: None,
            stats: None,
            command: Vec::new(),
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn kill_delay(mut self, kill_delay: Option<Duration>) -> Self {
        self.kill_delay = kill_delay;
        self
    }

    #[must_use]
    pub fn statistics_path(mut self, stats: Option<PathBuf>) -> Self {
        self.stats = stats;
        self
    }

    #[must_use]
    pub fn command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Full argv, helper path first.
    pub fn build(&self) -> Vec<OsString> {
        let mut argv = vec![self.wrapper.clone().into_os_string()];
        if let Some(timeout) = self.timeout {
            argv.push(format!("--timeout={}", ceil_secs(timeout)).into());
        }
        if let Some(kill_delay) = self.kill_delay {
            argv.push(format!("--kill_delay={}", ceil_secs(kill_delay)).into());
        }
        if let Some(stats) = &self.stats {
            let mut arg = OsString::from("--stats=");
            arg.push(stats.as_os_str());
            argv.push(arg);
        }
        argv.push("--".into());
        argv.extend(self.command.iter().map(OsString::from));
        argv
    }
}

/// Whole seconds, rounding any fraction up.
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

/// Locate the helper: the explicit path when configured, then a sibling of
/// the current executable, then `PATH`.
pub fn discover_wrapper(explicit: Option<&Path>) -> RunnerResult<PathBuf> {
    if let Some(path) = explicit {
        if is_executable(path) {
            return Ok(path.to_path_buf());
        }
        return Err(RunnerError::setup(
            format!("helper '{}' is missing or not executable", path.display()),
            serde_json::json!({
                "path": path.display().to_string(),
                "fix": "point the wrapper option at an executable spawnbox-wrapper binary",
            }),
        ));
    }
    for candidate in sibling_candidates() {
        if is_executable(&candidate) {
            return Ok(candidate);
        }
    }
    if let Some(found) = search_path(WRAPPER_BIN) {
        return Ok(found);
    }
    Err(RunnerError::unsupported(
        "no spawnbox-wrapper helper found on this system",
        serde_json::json!({
            "fix": "install spawnbox-wrapper next to this binary or onto PATH",
        }),
    ))
}

fn sibling_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join(WRAPPER_BIN));
            // Test binaries live one level below the build's bin directory.
            if let Some(parent) = dir.parent() {
                candidates.push(parent.join(WRAPPER_BIN));
            }
        }
    }
    candidates
}

fn search_path(bin: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(bin))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

/// Sidecar format written by the helper after reaping the command.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct WrapperStatistics {
    pub user_time_us: u64,
    pub system_time_us: u64,
    pub max_rss_kib: u64,
}

impl From<WrapperStatistics> for ResourceUsage {
    fn from(stats: WrapperStatistics) -> Self {
        Self {
            user_time: Duration::from_micros(stats.user_time_us),
            system_time: Duration::from_micros(stats.system_time_us),
            max_rss_kib: stats.max_rss_kib,
        }
    }
}

/// Parse the statistics sidecar the helper wrote.
pub fn read_statistics(path: &Path) -> RunnerResult<ResourceUsage> {
    let raw = std::fs::read(path)
        .map_err(|err| RunnerError::statistics("could not read statistics sidecar", err))?;
    let stats: WrapperStatistics = serde_json::from_slice(&raw)
        .map_err(|err| RunnerError::statistics("statistics sidecar is not valid JSON", err))?;
    Ok(stats.into())
}

/// Degrading read used after a run: a broken sidecar costs the statistics,
/// never the execution result.
pub(crate) fn statistics_or_none(path: &Path) -> Option<ResourceUsage> {
    match read_statistics(path) {
        Ok(stats) => Some(stats),
        Err(err) => {
            debug!(%err, path = %path.display(), "statistics unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::runner::ErrorCode;
    use std::io::Write;

    #[test]
    fn command_line_emits_flags_in_fixed_order() {
        let argv = WrapperCommandLine::new("/usr/libexec/spawnbox-wrapper")
            .timeout(Some(Duration::from_millis(1500)))
            .kill_delay(Some(Duration::from_secs(15)))
            .statistics_path(Some(PathBuf::from("/sb/stats.json")))
            .command(["echo", "hello"])
            .build();
        let rendered: Vec<String> = argv
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            rendered,
            vec![
                "/usr/libexec/spawnbox-wrapper",
                "--timeout=2",
                "--kill_delay=15",
                "--stats=/sb/stats.json",
                "--",
                "echo",
                "hello",
            ]
        );
    }

    #[test]
    fn command_line_omits_unset_flags_but_keeps_separator() {
        let argv = WrapperCommandLine::new("wrapper").command(["true"]).build();
        let rendered: Vec<String> = argv
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(rendered, vec!["wrapper", "--", "true"]);
    }

    #[test]
    fn durations_round_up_to_whole_seconds() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_secs(2)), 2);
        assert_eq!(ceil_secs(Duration::from_millis(2001)), 3);
    }

    #[test]
    fn explicit_wrapper_must_exist_and_be_executable() {
        let err = discover_wrapper(Some(Path::new("/nonexistent/spawnbox-wrapper")))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::SandboxSetup);
    }

    #[cfg(unix)]
    #[test]
    fn executable_probe_requires_the_execute_bit() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("data.txt");
        std::fs::File::create(&plain)
            .unwrap()
            .write_all(b"not a program")
            .unwrap();
        assert!(!is_executable(&plain));
        assert!(is_executable(Path::new("/bin/sh")));
    }

    #[test]
    fn statistics_sidecar_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = WrapperStatistics {
            user_time_us: 1_500_000,
            system_time_us: 250_000,
            max_rss_kib: 2048,
        };
        std::fs::write(&path, serde_json::to_vec(&stats).unwrap()).unwrap();
        let usage = read_statistics(&path).unwrap();
        assert_eq!(usage.user_time, Duration::from_micros(1_500_000));
        assert_eq!(usage.system_time, Duration::from_micros(250_000));
        assert_eq!(usage.max_rss_kib, 2048);
    }

    #[test]
    fn broken_sidecar_degrades_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, b"not json at all").unwrap();
        let err = read_statistics(&path).unwrap_err();
        assert_eq!(err.code, ErrorCode::Statistics);
        assert!(statistics_or_none(&path).is_none());

        let absent = dir.path().join("never-written.json");
        assert_eq!(read_statistics(&absent).unwrap_err().code, ErrorCode::Statistics);
    }

    #[test]
    fn negative_sidecar_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(
            &path,
            br#"{"user_time_us": -4, "system_time_us": 0, "max_rss_kib": 0}"#,
        )
        .unwrap();
        assert_eq!(read_statistics(&path).unwrap_err().code, ErrorCode::Statistics);
    }
}
