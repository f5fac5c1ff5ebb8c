//! Spawnbox CLI: sandboxed execution of build-action spawns.
//!
//! Command-line interface for running a single spawn inside a symlink
//! sandbox, probing the available strategy, and generating completions.

// CLI-specific lint allowances (CLI binary, not library)
#![allow(missing_docs)]
#![allow(clippy::print_stdout)] // CLI must print to stdout
#![allow(clippy::print_stderr)] // CLI must print to stderr
#![allow(clippy::exit)] // CLI uses exit codes

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use miette::{IntoDiagnostic, Result};
use spawnbox::manifest::load_manifest_file;
use spawnbox::model::{ExecutionPolicy, ExecutionResult, Spawn, SpawnBuilder, SpawnStatus};
use spawnbox::runner::{
    select_runner, LocalSpawnRunner, RunnerError, RunnerOptions, SpawnRunner,
};
use spawnbox::wrapper::discover_wrapper;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Color output mode
#[derive(Copy, Clone, Debug, Default, ValueEnum)]
enum ColorMode {
    /// Auto-detect based on terminal and `NO_COLOR` env
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

#[derive(Debug, Parser)]
#[command(name = "spawnbox", version, about = "Sandboxed runner for build-action spawns")]
struct Cli {
    /// Control color output
    #[arg(long, value_enum, default_value = "auto", global = true)]
    color: ColorMode,

    /// Show debug-level progress on stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one spawn and report its classified result
    Exec {
        #[arg(long)]
        json: bool,
        #[arg(long, help = "Directory the spawn's relative paths resolve against")]
        execroot: PathBuf,
        #[arg(long, help = "Base directory for per-invocation sandboxes (default: temp dir)")]
        sandbox_base: Option<PathBuf>,
        #[arg(long, help = "Explicit path to the spawnbox-wrapper helper")]
        wrapper: Option<PathBuf>,
        #[arg(long, help = "Execroot-relative input path (repeatable)")]
        input: Vec<PathBuf>,
        #[arg(long, help = "Execroot-relative output path (repeatable)")]
        output: Vec<PathBuf>,
        #[arg(long, help = "Environment entry KEY=VALUE (repeatable)")]
        env: Vec<String>,
        #[arg(long, help = "Wall-clock limit in seconds")]
        timeout_secs: Option<u64>,
        #[arg(long, help = "Grace between SIGTERM at the timeout and SIGKILL")]
        kill_delay_secs: Option<u64>,
        #[arg(long, help = "Collect resource usage of the finished process tree")]
        stats: bool,
        #[arg(long, help = "Keep the sandbox directory when the spawn fails")]
        retain_on_failure: bool,
        #[arg(long, help = "Run without a sandbox, directly in the execroot")]
        no_sandbox: bool,
        #[arg(long, help = "Load the spawn from a YAML or JSON manifest instead of flags")]
        manifest: Option<PathBuf>,
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// Report the execution strategy this host supports
    Probe {
        #[arg(long)]
        json: bool,
        #[arg(long, help = "Explicit path to the spawnbox-wrapper helper")]
        wrapper: Option<PathBuf>,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        #[arg(value_enum, help = "Shell to generate completions for")]
        shell: Shell,
    },
}

/// Configure color output based on CLI flag and environment
fn configure_colors(mode: ColorMode) {
    let use_color = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => {
            // Respect NO_COLOR; diagnostics go to stderr
            std::env::var("NO_COLOR").is_err()
                && supports_color::on(supports_color::Stream::Stderr).is_some()
        }
    };
    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .color(use_color)
                .unicode(use_color)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set
}

fn init_tracing(verbose: bool) {
    if !verbose {
        return;
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("spawnbox=debug,spawnbox_cli=debug")),
        )
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_colors(cli.color);
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Exec {
            json,
            execroot,
            sandbox_base,
            wrapper,
            input,
            output,
            env,
            timeout_secs,
            kill_delay_secs,
            stats,
            retain_on_failure,
            no_sandbox,
            manifest,
            command,
        } => cmd_exec(
            json,
            execroot,
            sandbox_base,
            wrapper,
            input,
            output,
            env,
            timeout_secs,
            kill_delay_secs,
            stats,
            retain_on_failure,
            no_sandbox,
            manifest,
            command,
        ),
        Commands::Probe { json, wrapper } => cmd_probe(json, wrapper),
        Commands::Completions { shell } => cmd_completions(shell),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

/// Handle the exec command.
#[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
fn cmd_exec(
    json: bool,
    execroot: PathBuf,
    sandbox_base: Option<PathBuf>,
    wrapper: Option<PathBuf>,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    envs: Vec<String>,
    timeout_secs: Option<u64>,
    kill_delay_secs: Option<u64>,
    stats: bool,
    retain_on_failure: bool,
    no_sandbox: bool,
    manifest: Option<PathBuf>,
    command: Vec<String>,
) -> Result<()> {
    let spawn = match build_spawn(manifest, command, inputs, outputs, envs, timeout_secs) {
        Ok(spawn) => spawn,
        Err(err) => return emit_error(json, &err),
    };
    let options =
        match resolve_options(execroot, sandbox_base, wrapper, kill_delay_secs, stats, retain_on_failure) {
            Ok(options) => options,
            Err(err) => return emit_error(json, &err),
        };
    let policy = ExecutionPolicy::new();
    install_cancel_handler(&policy);
    let runner = pick_runner(no_sandbox, &spawn, options);
    let result = runner.execute(&spawn, &policy);
    emit_result(json, &result)
}

/// Handle the probe command.
fn cmd_probe(json: bool, wrapper: Option<PathBuf>) -> Result<()> {
    let helper = discover_wrapper(wrapper.as_deref());
    let strategy = if cfg!(unix) && helper.is_ok() {
        "sandboxed"
    } else {
        "local"
    };
    if json {
        let payload = serde_json::to_string(&serde_json::json!({
            "os": std::env::consts::OS,
            "helper": helper.as_ref().ok().map(|path| path.display().to_string()),
            "strategy": strategy,
        }))
        .into_diagnostic()?;
        println!("{payload}");
    } else {
        println!("os: {}", std::env::consts::OS);
        match &helper {
            Ok(path) => println!("helper: {}", path.display()),
            Err(err) => println!("helper: not found ({})", err.message),
        }
        println!("strategy: {strategy}");
    }
    Ok(())
}

/// Handle the completions command.
#[allow(clippy::unnecessary_wraps)] // Consistent with other command handlers
fn cmd_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

// =============================================================================
// Spawn Assembly
// =============================================================================

fn build_spawn(
    manifest: Option<PathBuf>,
    command: Vec<String>,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    envs: Vec<String>,
    timeout_secs: Option<u64>,
) -> Result<Spawn, RunnerError> {
    if let Some(path) = manifest {
        let flags_given = !command.is_empty()
            || !inputs.is_empty()
            || !outputs.is_empty()
            || !envs.is_empty()
            || timeout_secs.is_some();
        if flags_given {
            return Err(RunnerError::setup(
                "--manifest replaces the spawn flags",
                Some(serde_json::json!({
                    "fix": "drop the command and spawn flags, or inline them in the manifest",
                })),
            ));
        }
        return load_manifest_file(&path)?.into_spawn();
    }
    let Some((program, args)) = command.split_first() else {
        return Err(RunnerError::setup(
            "missing command",
            Some(serde_json::json!({
                "fix": "pass a command after '--', or load one with --manifest",
            })),
        ));
    };
    let mut builder = SpawnBuilder::new(program).args(args.iter().cloned());
    for path in inputs {
        builder = builder.input(path);
    }
    for path in outputs {
        builder = builder.output(path);
    }
    for pair in envs {
        let (key, value) = split_env(&pair)?;
        builder = builder.env(key, value);
    }
    if let Some(secs) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder.build()
}

fn split_env(pair: &str) -> Result<(&str, &str), RunnerError> {
    pair.split_once('=').ok_or_else(|| {
        RunnerError::setup(
            format!("environment entry '{pair}' is not KEY=VALUE"),
            Some(serde_json::json!({
                "fix": "write --env NAME=value",
            })),
        )
    })
}

fn resolve_options(
    execroot: PathBuf,
    sandbox_base: Option<PathBuf>,
    wrapper: Option<PathBuf>,
    kill_delay_secs: Option<u64>,
    stats: bool,
    retain_on_failure: bool,
) -> Result<RunnerOptions, RunnerError> {
    let execroot = std::fs::canonicalize(&execroot).map_err(|err| {
        RunnerError::io(
            format!("exec root '{}' is not accessible", execroot.display()),
            err,
        )
    })?;
    let sandbox_base = sandbox_base.unwrap_or_else(|| std::env::temp_dir().join("spawnbox"));
    std::fs::create_dir_all(&sandbox_base).map_err(|err| {
        RunnerError::io(
            format!("could not create sandbox base '{}'", sandbox_base.display()),
            err,
        )
    })?;
    let mut options = RunnerOptions::new(execroot, sandbox_base);
    options.wrapper = wrapper;
    if let Some(secs) = kill_delay_secs {
        options.kill_delay = Duration::from_secs(secs);
    }
    options.collect_statistics = stats;
    options.retain_on_failure = retain_on_failure;
    Ok(options)
}

fn install_cancel_handler(policy: &ExecutionPolicy) {
    let cancel = policy.cancel.clone();
    if let Err(err) = ctrlc::set_handler(move || cancel.cancel()) {
        tracing::debug!(error = %err, "signal handler unavailable, Ctrl-C will not cancel cleanly");
    }
}

fn pick_runner(no_sandbox: bool, spawn: &Spawn, options: RunnerOptions) -> Box<dyn SpawnRunner> {
    if no_sandbox {
        return Box::new(LocalSpawnRunner::new(options));
    }
    let runner = select_runner(options.clone());
    if runner.supports(spawn) {
        runner
    } else {
        // Spawns tagged no-sandbox fall through to the unsandboxed strategy.
        Box::new(LocalSpawnRunner::new(options))
    }
}

// =============================================================================
// Result Emission
// =============================================================================

fn emit_result(json: bool, result: &ExecutionResult) -> Result<()> {
    if json {
        let payload = serde_json::to_string(&result_payload(result)).into_diagnostic()?;
        println!("{payload}");
    } else {
        io::stdout().write_all(&result.stdout).into_diagnostic()?;
        io::stderr().write_all(&result.stderr).into_diagnostic()?;
        describe_failure(result);
    }
    match result.status {
        SpawnStatus::Success => Ok(()),
        _ => std::process::exit(exit_code_for(result)),
    }
}

fn emit_error(json: bool, err: &RunnerError) -> Result<()> {
    if json {
        let payload = serde_json::to_string(&serde_json::json!({
            "code": err.code.as_str(),
            "message": err.message,
            "context": err.context,
        }))
        .into_diagnostic()?;
        println!("{payload}");
    } else {
        eprintln!("spawnbox: error: {err}");
    }
    std::process::exit(err.exit_code());
}

fn describe_failure(result: &ExecutionResult) {
    if result.status == SpawnStatus::Success {
        return;
    }
    match &result.failure {
        Some(message) => eprintln!("spawnbox: {message}"),
        None => eprintln!("spawnbox: spawn {}: {}", result.status, result.exit_summary()),
    }
    for path in &result.missing_outputs {
        eprintln!("spawnbox: missing output: {}", path.display());
    }
    if let Some(dir) = &result.retained_sandbox {
        eprintln!("spawnbox: sandbox retained at {}", dir.display());
    }
}

fn result_payload(result: &ExecutionResult) -> serde_json::Value {
    serde_json::json!({
        "status": result.status,
        "exit_code": result.exit_code,
        "timed_out": result.timed_out,
        "wall_time_ms": u64::try_from(result.wall_time.as_millis()).unwrap_or(u64::MAX),
        "stdout": String::from_utf8_lossy(&result.stdout),
        "stderr": String::from_utf8_lossy(&result.stderr),
        "statistics": result.statistics.map(|stats| serde_json::json!({
            "user_time_us": u64::try_from(stats.user_time.as_micros()).unwrap_or(u64::MAX),
            "system_time_us": u64::try_from(stats.system_time.as_micros()).unwrap_or(u64::MAX),
            "max_rss_kib": stats.max_rss_kib,
        })),
        "missing_outputs": result
            .missing_outputs
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>(),
        "failure": result.failure,
        "retained_sandbox": result.retained_sandbox.as_ref().map(|path| path.display().to_string()),
    })
}

/// Shell exit code for a classified result. The child's own code passes
/// through on plain execution failure.
fn exit_code_for(result: &ExecutionResult) -> i32 {
    match result.status {
        SpawnStatus::Success => 0,
        SpawnStatus::ExitFailure => result.exit_code.unwrap_or(1),
        SpawnStatus::SetupFailure => 2,
        SpawnStatus::MissingOutputs => 3,
        SpawnStatus::Unsupported => 4,
        SpawnStatus::Timeout => 124,
        SpawnStatus::Cancelled => 130,
    }
}
