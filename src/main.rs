//! `project-beacon` — command-line front end for the view beacon.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args
//!   3. Load config
//!   4. Resolve effective log level (CLI `-v` flags > env > config)
//!   5. Init logger once
//!   6. Open the preference store
//!   7. Run the requested command
//!
//! # Usage
//!
//! ```text
//! project-beacon [OPTIONS] <command> [args]
//!
//! Commands:
//!   watch                 read run-state lines from stdin and submit on start edges
//!   submit <id>           submit one beacon and wait for delivery
//!   consent               show the resolved opt-out decision
//!   opt-out | opt-in      store an explicit preference
//!   opt-reset             forget the stored preference
//!   news                  print the current announcement unless dismissed
//!   news-dismiss          dismiss the current announcement
//!   report <message...>   format a load-failure report
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use project_beacon::config::{self, Config};
use project_beacon::consent;
use project_beacon::error::AppError;
use project_beacon::logger;
use project_beacon::news::NewsBanner;
use project_beacon::prefs::{JsonFileStore, PreferenceStore};
use project_beacon::report::{self, LoadError, ReportContext, RESTORE_ADVICE};
use project_beacon::submitter::{BeaconSubmitter, DeliveryOutcome, SubmitOutcome};
use project_beacon::trigger::{self, RunState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let mut config = config::load(args.config_path.as_deref())?;
    if args.embedded {
        config.beacon.embedded = true;
    }

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        work_dir = %config.work_dir.display(),
        preferences = %config.preferences_file.display(),
        endpoint = %config.beacon.endpoint,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let store: Arc<dyn PreferenceStore> = Arc::new(JsonFileStore::new(&config.preferences_file));

    let command = args.command.as_deref().unwrap_or("watch");
    match command {
        "watch" => cmd_watch(&config, store).await,
        "submit" => {
            let id = args
                .rest
                .first()
                .ok_or_else(|| AppError::Config("submit requires a project id".into()))?;
            cmd_submit(&config, store, id).await
        }
        "consent" => {
            let submitter = BeaconSubmitter::new(&config.beacon, store)?;
            let decision = submitter.consent();
            let state = if decision.opted_out { "opted out" } else { "opted in" };
            println!("{state} ({})", decision.source);
            Ok(())
        }
        "opt-out" | "opt-in" => {
            let opted_out = command == "opt-out";
            consent::write_preference(store.as_ref(), opted_out)?;
            println!("stored preference: {}", if opted_out { "opted out" } else { "opted in" });
            Ok(())
        }
        "opt-reset" => {
            let removed = consent::clear_preference(store.as_ref())?;
            println!("{}", if removed { "stored preference cleared" } else { "no stored preference" });
            Ok(())
        }
        "news" => {
            let banner = NewsBanner::from_config(store, &config.news);
            if banner.visible() {
                let a = banner.announcement();
                println!("{}", a.message);
                if let Some(link) = &a.link {
                    println!("Learn more: {link}");
                }
            }
            Ok(())
        }
        "news-dismiss" => {
            NewsBanner::from_config(store, &config.news).dismiss();
            Ok(())
        }
        "report" => {
            if args.rest.is_empty() {
                return Err(AppError::Config("report requires an error message".into()));
            }
            let message = args.rest.join(" ");
            let location = std::env::current_dir()
                .map(|d| format!("file://{}", d.display()))
                .unwrap_or_else(|_| "unknown".into());
            println!("Could not load project:\n");
            println!("{}\n", report::format_report(&LoadError(message.clone()), &ReportContext::new(location)));
            if let Some(hint) = report::classify(&message).hint() {
                println!("{}\n{}: {}\n", hint.advice, hint.link_text, hint.link);
            }
            println!("{RESTORE_ADVICE}");
            Ok(())
        }
        other => Err(AppError::Config(format!("unknown command '{other}' (see --help)"))),
    }
}

async fn cmd_submit(config: &Config, store: Arc<dyn PreferenceStore>, id: &str) -> Result<(), AppError> {
    let submitter = BeaconSubmitter::new(&config.beacon, store)?;
    match submitter.submit(id) {
        SubmitOutcome::OptedOut(source) => println!("not submitted: opted out ({source})"),
        SubmitOutcome::AlreadySubmitted => println!("not submitted: already submitted"),
        // The CLI waits so the process does not exit mid-request.
        outcome @ SubmitOutcome::Dispatched(_) => match outcome.delivery().await {
            Some(DeliveryOutcome::Delivered { status }) => println!("delivered ({status})"),
            Some(DeliveryOutcome::Rejected { status }) => println!("rejected ({status})"),
            Some(DeliveryOutcome::Failed { reason }) => println!("failed: {reason}"),
            None => {}
        },
    }
    Ok(())
}

const RUN_STATE_QUEUE: usize = 64;
/// How long `watch` waits for in-flight beacons before exiting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Line protocol on stdin:
///
/// - `project <id>` — a project was loaded (not started)
/// - `start [<id>]` — the project started running
/// - `stop` — the project stopped
async fn cmd_watch(config: &Config, store: Arc<dyn PreferenceStore>) -> Result<(), AppError> {
    let submitter = Arc::new(BeaconSubmitter::new(&config.beacon, store)?);
    let decision = submitter.consent();
    info!(opted_out = decision.opted_out, source = %decision.source, "beacon consent resolved");

    let shutdown = CancellationToken::new();
    let no_project_id = config.beacon.no_project_id.clone();
    let mut current = RunState::new(false, no_project_id.clone());
    let (tx, rx) = mpsc::channel::<RunState>(RUN_STATE_QUEUE);

    let watcher = tokio::spawn(trigger::watch_runs(
        current.clone(),
        rx,
        Arc::clone(&submitter),
        no_project_id,
        shutdown.clone(),
    ));

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrl_c.cancel();
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (None, _) => continue,
            (Some("project"), Some(id)) => {
                current.started = false;
                current.project_id = id.to_string();
            }
            (Some("start"), id) => {
                if let Some(id) = id {
                    current.project_id = id.to_string();
                }
                current.started = true;
            }
            (Some("stop"), _) => current.started = false,
            (Some(other), _) => {
                warn!(command = other, "ignoring unrecognised input line");
                continue;
            }
        }
        if tx.send(current.clone()).await.is_err() {
            warn!("beacon trigger stopped, no longer reading run state");
            break;
        }
    }

    // Closing the queue lets the trigger finish whatever is still buffered.
    drop(tx);
    if let Err(e) = watcher.await {
        warn!(error = %e, "trigger task ended abnormally");
    }
    if !submitter.drain(SHUTDOWN_GRACE).await {
        warn!(in_flight = submitter.in_flight(), "exiting with beacon deliveries unfinished");
    }
    debug!(submitted = submitter.submitted_count(), "watch finished");
    Ok(())
}

// ── CLI arg parsing ────────────────────────────────────────────────────────

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
    embedded: bool,
    command: Option<String>,
    rest: Vec<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut embedded = false;
    let mut command = None;
    let mut rest = Vec::new();

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--" => {
                rest.extend(iter);
                break;
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--embed" => embedded = true,
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ if command.is_none() => command = Some(arg),
            _ => rest.push(arg),
        }
    }

    // -v → warn, -vv → info, -vvv → debug, -vvvv+ → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path, embedded, command, rest }
}

fn print_help() {
    println!("Usage: project-beacon [OPTIONS] <command> [args]");
    println!();
    println!("Commands:");
    println!("  watch                 read run-state lines from stdin (default)");
    println!("  submit <id>           submit one beacon and wait for delivery");
    println!("  consent               show the resolved opt-out decision");
    println!("  opt-out | opt-in      store an explicit preference");
    println!("  opt-reset             forget the stored preference");
    println!("  news                  print the current announcement unless dismissed");
    println!("  news-dismiss          dismiss the current announcement");
    println!("  report <message...>   format a load-failure report");
    println!();
    println!("Options:");
    println!("  -h, --help            Print help");
    println!("  -f, --config <PATH>   Path to configuration file (default: {})", config::DEFAULT_CONFIG_PATH);
    println!("      --embed           Report views as embedded (view/embed)");
    println!("  -v, -vv, -vvv, -vvvv  Increase logging verbosity");
}
