//! Supervision helper that sits between the orchestrator and the command.
//!
//! ```text
//! spawnbox-wrapper [--timeout=SECS] [--kill_delay=SECS] [--stats=PATH] -- <command> [args...]
//! ```
//!
//! Runs the command in a fresh process group with inherited stdio. With a
//! timeout, the whole group gets SIGTERM at the deadline and SIGKILL after
//! the kill delay. The helper's exit code is the command's, `128 + signal`
//! when the command died to a signal, or 107 when it could not be spawned
//! at all. Incoming SIGTERM/SIGINT are forwarded to the command's group.

// Helper-binary lint allowances (diagnostics and exit codes are its surface)
#![allow(missing_docs)]
#![allow(clippy::print_stderr)] // diagnostics go to stderr
#![allow(clippy::exit)] // the exit code is the contract

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use spawnbox::wrapper::{WrapperStatistics, WRAPPER_SPAWN_FAILED};
use std::ffi::OsString;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Pause between forwarding SIGTERM and escalating to SIGKILL.
const FORWARD_GRACE: Duration = Duration::from_millis(500);
const USAGE: &str =
    "usage: spawnbox-wrapper [--timeout=SECS] [--kill_delay=SECS] [--stats=PATH] -- <command> [args...]";

struct WrapperArgs {
    timeout: Option<Duration>,
    kill_delay: Duration,
    stats: Option<PathBuf>,
    command: Vec<OsString>,
}

enum Escalation {
    Waiting,
    Terminated { at: Instant },
    Killed,
}

fn main() {
    let args = match parse_args(std::env::args_os().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("spawnbox-wrapper: {message}");
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };
    std::process::exit(run(&args));
}

fn run(args: &WrapperArgs) -> i32 {
    let Some((program, rest)) = args.command.split_first() else {
        eprintln!("spawnbox-wrapper: missing command after '--'");
        return 2;
    };

    let mut child = match Command::new(program).args(rest).process_group(0).spawn() {
        Ok(child) => child,
        Err(err) => {
            eprintln!(
                "spawnbox-wrapper: could not run '{}': {err}",
                program.to_string_lossy()
            );
            return WRAPPER_SPAWN_FAILED;
        }
    };

    let raw_group = child.id();
    if let Err(err) = ctrlc::set_handler(move || forward_and_escalate(raw_group)) {
        eprintln!("spawnbox-wrapper: could not install signal forwarding: {err}");
    }

    let deadline = args.timeout.map(|timeout| Instant::now() + timeout);
    let mut escalation = Escalation::Waiting;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(err) => {
                eprintln!("spawnbox-wrapper: could not wait for the command: {err}");
                signal_child_group(raw_group, Signal::SIGKILL);
                let _ = child.wait();
                return 1;
            }
        }
        match escalation {
            Escalation::Waiting => {
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    signal_child_group(raw_group, Signal::SIGTERM);
                    escalation = Escalation::Terminated { at: Instant::now() };
                }
            }
            Escalation::Terminated { at } => {
                if Instant::now() >= at + args.kill_delay {
                    signal_child_group(raw_group, Signal::SIGKILL);
                    escalation = Escalation::Killed;
                }
            }
            Escalation::Killed => {}
        }
        thread::sleep(POLL_INTERVAL);
    };

    if let Some(path) = &args.stats {
        write_statistics(path);
    }
    exit_code(&status)
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<WrapperArgs, String> {
    let mut parsed = WrapperArgs {
        timeout: None,
        kill_delay: Duration::ZERO,
        stats: None,
        command: Vec::new(),
    };
    let mut saw_separator = false;
    while let Some(arg) = args.next() {
        if arg == "--" {
            saw_separator = true;
            parsed.command = args.collect();
            break;
        }
        let flag = arg
            .to_str()
            .ok_or_else(|| "flags must be valid UTF-8".to_string())?;
        if let Some(value) = flag.strip_prefix("--timeout=") {
            parsed.timeout = Some(parse_secs("--timeout", value)?);
        } else if let Some(value) = flag.strip_prefix("--kill_delay=") {
            parsed.kill_delay = parse_secs("--kill_delay", value)?;
        } else if let Some(value) = flag.strip_prefix("--stats=") {
            parsed.stats = Some(PathBuf::from(value));
        } else {
            return Err(format!("unrecognized argument '{flag}' before '--'"));
        }
    }
    if !saw_separator {
        return Err("missing '--' separator".to_string());
    }
    if parsed.command.is_empty() {
        return Err("missing command after '--'".to_string());
    }
    Ok(parsed)
}

fn parse_secs(flag: &str, value: &str) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| format!("invalid {flag} value '{value}' (whole seconds expected)"))
}

/// Forward an incoming termination signal to the command's group, then
/// escalate so a signal-ignoring command cannot outlive the helper.
fn forward_and_escalate(raw_group: u32) {
    signal_child_group(raw_group, Signal::SIGTERM);
    thread::sleep(FORWARD_GRACE);
    signal_child_group(raw_group, Signal::SIGKILL);
}

fn signal_child_group(raw_group: u32, signal: Signal) {
    // Process IDs are always positive and fit in i32
    #[allow(clippy::cast_possible_wrap)]
    let group = Pid::from_raw(raw_group as i32);
    match killpg(group, signal) {
        // ESRCH means the group is already gone, which is fine
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(err) => eprintln!("spawnbox-wrapper: could not signal the command group: {err}"),
    }
}

fn exit_code(status: &ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

fn write_statistics(path: &Path) {
    use nix::sys::resource::{getrusage, UsageWho};
    let usage = match getrusage(UsageWho::RUSAGE_CHILDREN) {
        Ok(usage) => usage,
        Err(err) => {
            eprintln!("spawnbox-wrapper: getrusage failed: {err}");
            return;
        }
    };
    let stats = WrapperStatistics {
        user_time_us: timeval_micros(usage.user_time()),
        system_time_us: timeval_micros(usage.system_time()),
        max_rss_kib: max_rss_kib(usage.max_rss()),
    };
    let payload = match serde_json::to_vec(&stats) {
        Ok(payload) => payload,
        Err(err) => {
            eprintln!("spawnbox-wrapper: could not encode statistics: {err}");
            return;
        }
    };
    if let Err(err) = std::fs::write(path, payload) {
        eprintln!(
            "spawnbox-wrapper: could not write statistics to '{}': {err}",
            path.display()
        );
    }
}

fn timeval_micros(time: nix::sys::time::TimeVal) -> u64 {
    let secs = u64::try_from(time.tv_sec()).unwrap_or(0);
    let micros = u64::try_from(time.tv_usec()).unwrap_or(0);
    secs.saturating_mul(1_000_000).saturating_add(micros)
}

/// `ru_maxrss` is KiB on Linux but bytes on macOS.
fn max_rss_kib(raw: i64) -> u64 {
    let raw = u64::try_from(raw).unwrap_or(0);
    if cfg!(target_os = "macos") {
        raw / 1024
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn os_args(args: &[&str]) -> impl Iterator<Item = OsString> {
        args.iter()
            .map(OsString::from)
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn full_grammar_parses() {
        let parsed = parse_args(os_args(&[
            "--timeout=5",
            "--kill_delay=2",
            "--stats=/tmp/stats.json",
            "--",
            "/bin/echo",
            "hi",
        ]))
        .unwrap();
        assert_eq!(parsed.timeout, Some(Duration::from_secs(5)));
        assert_eq!(parsed.kill_delay, Duration::from_secs(2));
        assert_eq!(parsed.stats, Some(PathBuf::from("/tmp/stats.json")));
        assert_eq!(parsed.command, vec![OsString::from("/bin/echo"), OsString::from("hi")]);
    }

    #[test]
    fn kill_delay_defaults_to_zero() {
        let parsed = parse_args(os_args(&["--", "/bin/true"])).unwrap();
        assert_eq!(parsed.timeout, None);
        assert_eq!(parsed.kill_delay, Duration::ZERO);
        assert_eq!(parsed.stats, None);
    }

    #[test]
    fn flag_like_arguments_after_separator_belong_to_the_command() {
        let parsed = parse_args(os_args(&["--", "/bin/echo", "--timeout=9"])).unwrap();
        assert_eq!(
            parsed.command,
            vec![OsString::from("/bin/echo"), OsString::from("--timeout=9")]
        );
        assert_eq!(parsed.timeout, None);
    }

    #[test]
    fn separator_and_command_are_mandatory() {
        assert!(parse_args(os_args(&["--timeout=5"])).is_err());
        assert!(parse_args(os_args(&["--"])).is_err());
        assert!(parse_args(os_args(&[])).is_err());
    }

    #[test]
    fn unknown_flags_and_bad_values_are_rejected() {
        assert!(parse_args(os_args(&["--bogus", "--", "/bin/true"])).is_err());
        assert!(parse_args(os_args(&["--timeout=abc", "--", "/bin/true"])).is_err());
        assert!(parse_args(os_args(&["--timeout=-1", "--", "/bin/true"])).is_err());
    }
}
