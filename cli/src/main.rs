//! gridsync - Command-line client for moving and syncing files with a data grid.
//!
//! Thin layer over `gridsync_engine`: argument parsing, logging setup,
//! interactive prompts and a summary on stderr. Exit codes are 0 on success,
//! 1 when anything failed and 2 for invalid arguments or configuration.

mod progress;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use gridsync_engine::{
    BulkReport, Config, EngineError, FailurePolicy, NoopProgress, Orchestrator, ProgressSink, Prompter,
    RetrySupervisor, Session, TransferFlags, TransferOptions,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::progress::TerminalProgress;

/// gridsync - move and sync files between local disk and a data grid
#[derive(Parser, Debug)]
#[command(name = "gridsync", version)]
#[command(about = "Move and sync files between local disk and a data grid")]
struct Cli {
    /// Configuration file (defaults to $GRIDSYNC_CONFIG, then ~/.config/gridsync/config.toml)
    #[arg(short = 'c', long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download remote data objects or collections (i:<path>) to a local directory
    Get {
        #[command(flatten)]
        transfer: TransferArgs,
        /// Sources followed by an optional local target (default: current directory)
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<String>,
    },
    /// Upload local files or directories to a remote collection
    Put {
        #[command(flatten)]
        transfer: TransferArgs,
        /// Sources followed by an optional remote target (default: working collection)
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<String>,
    },
    /// Differential transfer; prefix remote paths with i:
    Sync {
        #[command(flatten)]
        transfer: TransferArgs,
        /// Sources followed by the target
        #[arg(required = true, num_args = 2.., value_name = "PATH")]
        paths: Vec<String>,
    },
    /// Copy between remote collections
    Cp {
        #[command(flatten)]
        transfer: TransferArgs,
        /// Sources followed by the remote target
        #[arg(required = true, num_args = 2.., value_name = "PATH")]
        paths: Vec<String>,
    },
    /// Change the working collection (home when no path is given)
    Cd { path: Option<String> },
    /// Print the working collection
    Pwd,
}

/// Flags shared by the bulk commands.
#[derive(Args, Debug, Clone, Default)]
struct TransferArgs {
    /// Overwrite existing destinations without asking
    #[arg(short, long)]
    force: bool,

    /// Skip files whose destination already matches
    #[arg(long)]
    diff: bool,

    /// With --diff, compare sizes only
    #[arg(long = "no_hash")]
    no_hash: bool,

    /// Transfer threads
    #[arg(long = "thread_num", value_name = "N")]
    thread_num: Option<usize>,

    /// Show progress bars
    #[arg(long)]
    progress: bool,

    /// Total attempts for the whole command
    #[arg(long, value_name = "N")]
    retry: Option<u32>,

    /// Seconds between attempts
    #[arg(long = "retry_interval", value_name = "SECONDS")]
    retry_interval: Option<u64>,

    /// Set on re-invocations; disables further retries
    #[arg(long = "retry_child", hide = true)]
    retry_child: bool,

    /// Transfer the contents of a directory source without its root directory
    #[arg(long = "no_root")]
    no_root: bool,

    /// Delete target entries that are not part of the transfer
    #[arg(long)]
    delete: bool,

    /// Stop scheduling new files after the first failure
    #[arg(long = "fail_fast")]
    fail_fast: bool,
}

impl TransferArgs {
    fn options(&self) -> TransferOptions {
        TransferOptions {
            flags: TransferFlags {
                force: self.force,
                diff: self.diff,
                no_hash: self.no_hash,
            },
            no_root: self.no_root,
            delete_extra: self.delete,
            failure_policy: if self.fail_fast {
                FailurePolicy::FailFast
            } else {
                FailurePolicy::BestEffort
            },
        }
    }

    fn apply_to(&self, config: &mut Config) {
        if let Some(threads) = self.thread_num {
            config.thread_num = threads;
        }
        if let Some(retry) = self.retry {
            config.retry = retry;
        }
        if let Some(interval) = self.retry_interval {
            config.retry_interval = interval;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BulkKind {
    Get,
    Put,
    Sync,
    Copy,
}

impl BulkKind {
    fn name(self) -> &'static str {
        match self {
            BulkKind::Get => "get",
            BulkKind::Put => "put",
            BulkKind::Sync => "sync",
            BulkKind::Copy => "cp",
        }
    }

    /// Target used when only sources are given.
    fn default_target(self) -> Option<&'static str> {
        match self {
            BulkKind::Get | BulkKind::Put => Some("."),
            BulkKind::Sync | BulkKind::Copy => None,
        }
    }
}

/// Asks on stderr and reads y/n from stdin. Anything but yes declines.
struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn confirm(&self, question: &str) -> bool {
        let mut stderr = io::stderr();
        let _ = write!(stderr, "{} [y/n] ", question);
        let _ = stderr.flush();

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(_) => false,
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "gridsync=info,gridsync_engine=info",
        1 => "gridsync=debug,gridsync_engine=debug",
        _ => "gridsync=trace,gridsync_engine=trace",
    };
    let filter = EnvFilter::try_from_env("GRIDSYNC_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default));

    let json = std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false);
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(false)
            .init();
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match run_cli(&cli) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            exit_code(&err)
        }
    };

    std::process::exit(exit_code);
}

/// 2 for usage and configuration problems, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EngineError>() {
        Some(e) if !e.is_retryable() => 2,
        _ => 1,
    }
}

/// Main CLI logic - separated for testability
fn run_cli(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Get { transfer, paths } => run_bulk(cli, BulkKind::Get, transfer, paths),
        Command::Put { transfer, paths } => run_bulk(cli, BulkKind::Put, transfer, paths),
        Command::Sync { transfer, paths } => run_bulk(cli, BulkKind::Sync, transfer, paths),
        Command::Cp { transfer, paths } => run_bulk(cli, BulkKind::Copy, transfer, paths),
        Command::Cd { path } => {
            let mut session = open_session(cli, None)?;
            let remote = session.connect()?;
            let cwd = session
                .change_dir(path.as_deref(), remote.as_ref())
                .with_context(|| format!("cd {}", path.as_deref().unwrap_or("~")))?;
            println!("{}", cwd);
            Ok(())
        }
        Command::Pwd => {
            let session = open_session(cli, None)?;
            println!("{}", session.cwd());
            Ok(())
        }
    }
}

fn open_session(cli: &Cli, transfer: Option<&TransferArgs>) -> anyhow::Result<Session> {
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(transfer) = transfer {
        transfer.apply_to(&mut config);
    }
    let session = Session::new(config).context("invalid configuration")?;
    let account = session.account();
    debug!("{}#{} working collection {}", account.user, account.zone, session.cwd());
    Ok(session)
}

/// Split trailing target from sources.
fn split_paths(kind: BulkKind, paths: &[String]) -> Result<(Vec<String>, String), EngineError> {
    match (paths.split_last(), kind.default_target()) {
        (Some((target, sources)), _) if !sources.is_empty() => Ok((sources.to_vec(), target.clone())),
        (Some(_), Some(default)) => Ok((paths.to_vec(), default.to_string())),
        _ => Err(EngineError::InvalidArguments(format!(
            "{} needs at least one source and a target",
            kind.name()
        ))),
    }
}

fn run_bulk(cli: &Cli, kind: BulkKind, transfer: &TransferArgs, paths: &[String]) -> anyhow::Result<()> {
    let (sources, target) = split_paths(kind, paths)?;
    let session = open_session(cli, Some(transfer))?;
    let remote = session.connect()?;

    let sink: Arc<dyn ProgressSink> = if transfer.progress {
        Arc::new(TerminalProgress::new())
    } else {
        Arc::new(NoopProgress)
    };
    let prompter = StdinPrompter;
    let orchestrator = Orchestrator::new(&session, remote, &prompter, sink);
    let options = transfer.options();
    let supervisor = RetrySupervisor::new(session.config().retry_policy());

    let started = Instant::now();
    let report = supervisor
        .run(transfer.retry_child, |attempt| {
            if attempt.number > 1 {
                info!("{}: attempt {}", kind.name(), attempt.number);
            }
            match kind {
                BulkKind::Get => orchestrator.get(&sources, &target, &options),
                BulkKind::Put => orchestrator.put(&sources, &target, &options),
                BulkKind::Sync => orchestrator.sync(&sources, &target, &options),
                BulkKind::Copy => orchestrator.copy(&sources, &target, &options),
            }
        })
        .with_context(|| format!("{} failed", kind.name()))?;

    print_summary(&report, started.elapsed());
    Ok(())
}

fn print_summary(report: &BulkReport, elapsed: Duration) {
    eprintln!(
        "Summary: {} transferred ({} resumed), {} skipped",
        report.completed, report.resumed, report.skipped
    );
    if let Some(reconciled) = &report.reconciled {
        eprintln!(
            "Deleted: {} files, {} directories",
            reconciled.removed_files.len(),
            reconciled.removed_directories.len()
        );
    }
    eprintln!("Bytes transferred: {}", format_bytes(report.bytes_transferred));
    eprintln!("Elapsed: {}", format_duration(elapsed));
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    /// Writes a config pointing at a grid directory inside `dir`.
    fn write_config(dir: &Path) -> PathBuf {
        let grid = dir.join("grid");
        fs::create_dir_all(grid.join("zoneA/home/bob")).expect("Failed to create grid");
        let config = format!(
            "user = \"bob\"\nzone = \"zoneA\"\nremote_root = {:?}\nsession_file = {:?}\nthread_num = 2\n",
            grid.display().to_string(),
            dir.join("session.json").display().to_string(),
        );
        let path = dir.join("config.toml");
        fs::write(&path, config).expect("Failed to write config");
        path
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("Failed to parse args")
    }

    #[test]
    fn test_parse_transfer_flags() {
        let cli = parse(&[
            "gridsync", "put", "--diff", "--no_hash", "--thread_num", "8", "--retry", "3", "--delete", "-f", "a",
            "b", "i:dest",
        ]);
        match cli.command {
            Command::Put { transfer, paths } => {
                assert!(transfer.diff && transfer.no_hash && transfer.delete && transfer.force);
                assert_eq!(transfer.thread_num, Some(8));
                assert_eq!(transfer.retry, Some(3));
                assert_eq!(paths, vec!["a", "b", "i:dest"]);

                let options = transfer.options();
                assert!(options.delete_extra);
                assert_eq!(options.failure_policy, FailurePolicy::BestEffort);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_sync_requires_target() {
        assert!(Cli::try_parse_from(["gridsync", "sync", "only-one"]).is_err());
    }

    #[test]
    fn test_split_paths_defaults() {
        let (sources, target) = split_paths(BulkKind::Get, &["i:data".to_string()]).expect("split");
        assert_eq!(sources, vec!["i:data"]);
        assert_eq!(target, ".");

        let (sources, target) =
            split_paths(BulkKind::Copy, &["a".to_string(), "b".to_string(), "c".to_string()]).expect("split");
        assert_eq!(sources, vec!["a", "b"]);
        assert_eq!(target, "c");

        assert!(split_paths(BulkKind::Copy, &["a".to_string()]).is_err());
    }

    #[test]
    fn test_is_yes() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("n"));
        assert!(!is_yes(""));
    }

    #[test]
    fn test_get_end_to_end() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = write_config(temp_dir.path());
        let remote_dir = temp_dir.path().join("grid/zoneA/home/bob/results");
        fs::create_dir_all(remote_dir.join("sub")).expect("Failed to create dir");
        fs::write(remote_dir.join("a.txt"), "hello").expect("Failed to write file");
        fs::write(remote_dir.join("sub/b.txt"), "world").expect("Failed to write file");

        let local = temp_dir.path().join("local");
        fs::create_dir(&local).expect("Failed to create dir");

        let cli = parse(&[
            "gridsync",
            "-c",
            config.to_str().expect("utf-8 path"),
            "get",
            "i:results",
            local.to_str().expect("utf-8 path"),
        ]);
        run_cli(&cli).expect("get should succeed");

        assert_eq!(fs::read_to_string(local.join("results/a.txt")).expect("read"), "hello");
        assert_eq!(fs::read_to_string(local.join("results/sub/b.txt")).expect("read"), "world");
    }

    #[test]
    fn test_get_with_delete_prunes_and_summarises() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = write_config(temp_dir.path());
        let remote_dir = temp_dir.path().join("grid/zoneA/home/bob/results");
        fs::create_dir_all(&remote_dir).expect("Failed to create dir");
        fs::write(remote_dir.join("a.txt"), "hello").expect("Failed to write file");

        let local = temp_dir.path().join("local");
        fs::create_dir_all(local.join("old")).expect("Failed to create dir");
        fs::write(local.join("stale.txt"), "stale").expect("Failed to write file");

        let cli = parse(&[
            "gridsync",
            "-c",
            config.to_str().expect("utf-8 path"),
            "get",
            "--no_root",
            "--delete",
            "i:results",
            local.to_str().expect("utf-8 path"),
        ]);
        run_cli(&cli).expect("get should succeed");

        assert_eq!(fs::read_to_string(local.join("a.txt")).expect("read"), "hello");
        assert!(!local.join("stale.txt").exists());
        assert!(!local.join("old").exists());
    }

    #[test]
    fn test_print_summary_with_reconciliation() {
        let report = BulkReport {
            completed: 2,
            bytes_transferred: 2048,
            reconciled: Some(gridsync_engine::ReconcileReport {
                removed_files: vec![PathBuf::from("/t/a")],
                removed_directories: vec![PathBuf::from("/t/d")],
                failures: 0,
            }),
            ..BulkReport::default()
        };
        print_summary(&report, Duration::from_secs(3));
    }

    #[test]
    fn test_no_root_with_several_sources_exits_2() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = write_config(temp_dir.path());

        let cli = parse(&[
            "gridsync",
            "-c",
            config.to_str().expect("utf-8 path"),
            "get",
            "--no_root",
            "i:a",
            "i:b",
            temp_dir.path().to_str().expect("utf-8 path"),
        ]);
        let err = run_cli(&cli).unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn test_missing_config_exits_2() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let missing = temp_dir.path().join("nope.toml");

        let cli = parse(&["gridsync", "-c", missing.to_str().expect("utf-8 path"), "pwd"]);
        let err = run_cli(&cli).unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn test_missing_source_exits_1() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = write_config(temp_dir.path());

        let cli = parse(&[
            "gridsync",
            "-c",
            config.to_str().expect("utf-8 path"),
            "get",
            "i:missing",
            temp_dir.path().to_str().expect("utf-8 path"),
        ]);
        let err = run_cli(&cli).unwrap_err();
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn test_cd_then_pwd() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = write_config(temp_dir.path());
        fs::create_dir(temp_dir.path().join("grid/zoneA/home/bob/projects")).expect("Failed to create dir");
        let config = config.to_str().expect("utf-8 path");

        run_cli(&parse(&["gridsync", "-c", config, "cd", "projects"])).expect("cd should succeed");
        let session = open_session(&parse(&["gridsync", "-c", config, "pwd"]), None).expect("session");
        assert_eq!(session.cwd(), "/zoneA/home/bob/projects");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
