//! Supervised execution of one helper command line.
//!
//! Both strategies funnel through [`run_supervised`]: launch the helper in
//! its own process group, drain its pipes on reader threads, and poll for
//! exit while watching the cancel token and the supervision bound. The
//! helper enforces the command's timeout itself; the bound here only
//! catches a helper that fails to come back at all.

use crate::model::CancelToken;
use crate::runner::{RunnerError, RunnerResult};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Slack past `timeout + kill_delay` before the helper itself is presumed
/// hung.
pub(crate) const SUPERVISION_GRACE: Duration = Duration::from_secs(5);
/// How long a cancelled helper gets to forward the signal and exit before
/// its group is force-killed.
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// One fully resolved helper launch.
pub(crate) struct Invocation {
    pub argv: Vec<OsString>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
}

pub(crate) struct Supervision<'a> {
    pub cancel: &'a CancelToken,
    /// Upper bound on the helper's lifetime; `None` waits indefinitely.
    pub bound: Option<Duration>,
}

/// Raw observation of a finished helper, before classification.
#[derive(Debug)]
pub(crate) struct RawExecution {
    pub exit_code: i32,
    pub wall_time: Duration,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

enum Waited {
    Exited(ExitStatus),
    Cancelled,
    Overrun,
    PollFailed(std::io::Error),
}

pub(crate) fn run_supervised(
    invocation: Invocation,
    supervision: &Supervision<'_>,
) -> RunnerResult<RawExecution> {
    let started = Instant::now();
    let (program, args) = invocation
        .argv
        .split_first()
        .ok_or_else(|| RunnerError::setup("helper command line is empty", None))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&invocation.cwd)
        .env_clear()
        .envs(&invocation.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let mut child = command.spawn().map_err(|err| {
        RunnerError::setup(
            format!(
                "could not launch helper '{}'",
                program.to_string_lossy()
            ),
            serde_json::json!({
                "source": err.to_string(),
                "fix": "check that the helper binary exists and is executable",
            }),
        )
    })?;

    let stdout_pipe = spawn_drain(child.stdout.take());
    let stderr_pipe = spawn_drain(child.stderr.take());
    let deadline = supervision.bound.map(|bound| started + bound);

    let waited = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Waited::Exited(status),
            Ok(None) => {}
            Err(err) => {
                kill_group(&mut child);
                break Waited::PollFailed(err);
            }
        }
        if supervision.cancel.is_cancelled() {
            terminate_group(&mut child, CANCEL_GRACE);
            break Waited::Cancelled;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            kill_group(&mut child);
            break Waited::Overrun;
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = join_drain(stdout_pipe);
    let stderr = join_drain(stderr_pipe);
    let wall_time = started.elapsed();

    match waited {
        Waited::Exited(status) => Ok(RawExecution {
            exit_code: exit_code_of(&status),
            wall_time,
            stdout,
            stderr,
        }),
        Waited::Cancelled => Err(RunnerError::cancelled("spawn cancelled by the caller")),
        Waited::Overrun => Err(RunnerError::setup(
            "helper did not terminate within its supervision bound",
            serde_json::json!({
                "bound_secs": supervision.bound.map(|bound| bound.as_secs()),
                "fix": "the helper must enforce its own timeout; inspect the helper binary",
            }),
        )),
        Waited::PollFailed(err) => {
            Err(RunnerError::io("could not poll the helper process", err))
        }
    }
}

/// SIGTERM the helper's group, give it `grace` to exit, then force-kill.
fn terminate_group(child: &mut Child, grace: Duration) {
    signal_group(child, Signal::SIGTERM);
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(_) => break,
        }
    }
    kill_group(child);
}

fn kill_group(child: &mut Child) {
    signal_group(child, Signal::SIGKILL);
    let _ = child.wait();
}

fn signal_group(child: &Child, signal: Signal) {
    // Process IDs are always positive and fit in i32
    #[allow(clippy::cast_possible_wrap)]
    let pgid = Pid::from_raw(child.id() as i32);
    match killpg(pgid, signal) {
        // ESRCH means the group is already gone, which is fine
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(err) => warn!(%err, ?signal, "could not signal helper process group"),
    }
}

fn spawn_drain<R>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>>
where
    R: Read + Send + 'static,
{
    pipe.map(|mut stream| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = stream.read_to_end(&mut buffer);
            buffer
        })
    })
}

fn join_drain(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn exit_code_of(status: &ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}
