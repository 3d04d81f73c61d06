//! Flowtrack CLI Entry Point
//!
//! Provides command-line interface for tracking workflow runs.
//!
//! # Usage
//!
//! ```bash
//! # Track the built-in sample workflow
//! flowtrack run
//!
//! # Track a workflow loaded from YAML
//! flowtrack run steps.yaml --title "Nightly audit"
//!
//! # With pause control
//! flowtrack run steps.yaml --pause-flag /tmp/pause.flag
//!
//! # Faster cadence for demos
//! flowtrack run steps.yaml --cadence-ms 250 --timeout-ms 1000
//!
//! # Continue runs interrupted by Ctrl-C
//! flowtrack recover
//!
//! # Show finished runs
//! flowtrack history
//! ```

use std::collections::HashSet;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use colored::Colorize;
use log::{error, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};

use flowtrack::execution::{
    watch_pause_flag, TrackerConfig, TrackerEvent, WorkflowTracker, DEFAULT_CATCH_UP_PER_TICK,
    DEFAULT_FALLBACK_TIMEOUT, DEFAULT_TICK_INTERVAL,
};
use flowtrack::storage::archive::load_history;
use flowtrack::storage::{FileStore, Outcome, SnapshotStore};
use flowtrack::workflow::{load_steps, sample_steps};
use flowtrack::{APP_NAME, VERSION};

/// Subcommand selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Recover,
    History,
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    command: Command,
    steps_path: Option<String>,
    instance_id: Option<String>,
    title: Option<String>,
    pause_flag_path: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    cadence_ms: u64,
    timeout_ms: u64,
    catch_up: usize,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: Command::Run,
            steps_path: None,
            instance_id: None,
            title: None,
            pause_flag_path: None,
            state_dir: None,
            cadence_ms: DEFAULT_TICK_INTERVAL.as_millis() as u64,
            timeout_ms: DEFAULT_FALLBACK_TIMEOUT.as_millis() as u64,
            catch_up: DEFAULT_CATCH_UP_PER_TICK,
            verbose: false,
        }
    }
}

impl Config {
    fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig::default()
            .with_tick_interval(Duration::from_millis(self.cadence_ms))
            .with_fallback_timeout(Duration::from_millis(self.timeout_ms))
            .with_catch_up_per_tick(self.catch_up)
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Workflow Execution Progress Tracker");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: flowtrack [COMMAND] [OPTIONS] [STEPS_FILE]");
    println!();
    println!("Commands:");
    println!("  run [STEPS_FILE]     Track a workflow (sample workflow if no file given)");
    println!("  recover              Continue runs saved by an interrupted session");
    println!("  history              Show finished runs");
    println!();
    println!("Options:");
    println!("  --id ID              Instance id (default: workflow_<millis>)");
    println!("  --title TEXT         Display title for the run");
    println!("  --pause-flag PATH    Pause while PATH exists");
    println!("  --state-dir PATH     Directory for snapshots and history");
    println!(
        "  --cadence-ms N       Tick interval in ms (default: {})",
        DEFAULT_TICK_INTERVAL.as_millis()
    );
    println!(
        "  --timeout-ms N       Silence before synthesizing a step (default: {})",
        DEFAULT_FALLBACK_TIMEOUT.as_millis()
    );
    println!(
        "  --catch-up N         Queued signals applied per tick (default: {})",
        DEFAULT_CATCH_UP_PER_TICK
    );
    println!("  --verbose            Enable debug logging");
    println!("  --help               Show this help message");
    println!("  --version            Show version information");
    println!();
    println!("Examples:");
    println!("  flowtrack run");
    println!("  flowtrack run audit.yaml --pause-flag /tmp/pause.flag");
    println!("  flowtrack history --state-dir /var/lib/flowtrack");
}

fn option_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", flag))
}

fn parse_number<T: FromStr>(args: &[String], i: usize, flag: &str) -> Result<T, String> {
    let raw = option_value(args, i, flag)?;
    raw.parse()
        .map_err(|_| format!("Invalid value for {}: {}", flag, raw))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_index = 0;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--id" => {
                i += 1;
                config.instance_id = Some(option_value(args, i, "--id")?.to_string());
            }
            "--title" => {
                i += 1;
                config.title = Some(option_value(args, i, "--title")?.to_string());
            }
            "--pause-flag" => {
                i += 1;
                config.pause_flag_path = Some(PathBuf::from(option_value(args, i, "--pause-flag")?));
            }
            "--state-dir" => {
                i += 1;
                config.state_dir = Some(PathBuf::from(option_value(args, i, "--state-dir")?));
            }
            "--cadence-ms" => {
                i += 1;
                config.cadence_ms = parse_number(args, i, "--cadence-ms")?;
                if config.cadence_ms == 0 {
                    return Err("--cadence-ms must be positive".to_string());
                }
            }
            "--timeout-ms" => {
                i += 1;
                config.timeout_ms = parse_number(args, i, "--timeout-ms")?;
            }
            "--catch-up" => {
                i += 1;
                config.catch_up = parse_number(args, i, "--catch-up")?;
                if config.catch_up == 0 {
                    return Err("--catch-up must be at least 1".to_string());
                }
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                match (positional_index, arg.as_str()) {
                    (0, "run") => config.command = Command::Run,
                    (0, "recover") => config.command = Command::Recover,
                    (0, "history") => config.command = Command::History,
                    // A bare file name means `run FILE`.
                    (0, _) | (1, _) if config.command == Command::Run && config.steps_path.is_none() => {
                        config.steps_path = Some(arg.clone());
                    }
                    _ => return Err(format!("Unexpected argument: {}", arg)),
                }
                positional_index += 1;
            }
        }
        i += 1;
    }

    Ok(config)
}

fn open_store(config: &Config) -> Result<Arc<dyn SnapshotStore>, Box<dyn std::error::Error>> {
    let store = match &config.state_dir {
        Some(dir) => FileStore::open(dir.clone())?,
        None => FileStore::open_default()?,
    };
    info!("State directory: {}", store.dir().display());
    Ok(Arc::new(store))
}

/// Prints one tracker event as a progress line.
fn print_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::Started {
            instance_id,
            total_steps,
        } => println!(
            "{} {} ({} steps)",
            "started".green().bold(),
            instance_id,
            total_steps
        ),
        TrackerEvent::Degraded {
            instance_id,
            reason,
        } => println!(
            "{} {}: {}, progress will be simulated",
            "demo".yellow(),
            instance_id,
            reason
        ),
        TrackerEvent::StepApplied {
            step,
            synthesized,
            progress,
            ..
        } => {
            let marker = if *synthesized {
                "~".yellow()
            } else {
                "✓".green()
            };
            println!("  {} step {:<3} {}", marker, step, progress);
        }
        TrackerEvent::Paused { instance_id } => {
            println!("{} {}", "paused".yellow().bold(), instance_id)
        }
        TrackerEvent::Resumed { instance_id } => {
            println!("{} {}", "resumed".cyan().bold(), instance_id)
        }
        TrackerEvent::Completed {
            instance_id,
            summary,
        } => println!(
            "{} {}: {}",
            "completed".green().bold(),
            instance_id,
            summary.describe()
        ),
        TrackerEvent::Failed { instance_id, cause } => {
            println!("{} {}: {}", "failed".red().bold(), instance_id, cause)
        }
        TrackerEvent::Cancelled { instance_id } => {
            println!("{} {}", "cancelled".dimmed(), instance_id)
        }
    }
}

/// Prints the progress chart of the most recent archived run of `instance_id`.
fn print_timeline(store: &dyn SnapshotStore, instance_id: &str) {
    match load_history(store) {
        Ok(history) => {
            if let Some(run) = history.iter().rev().find(|run| run.id == instance_id) {
                println!();
                println!("{}", run.name.bold());
                print!("{}", run.timeline.progress_chart(run.finished_at));
            }
        }
        Err(e) => warn!("Could not read run history: {}", e),
    }
}

/// Prints events until every instance in `pending` has finished or Ctrl-C
/// is pressed.
async fn follow(
    tracker: &WorkflowTracker,
    store: &dyn SnapshotStore,
    mut events: broadcast::Receiver<TrackerEvent>,
    mut pending: HashSet<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut failures = 0;

    while !pending.is_empty() {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!();
                warn!("Interrupted; saving state for {} workflow(s)", pending.len());
                tracker.shutdown();
                println!("Run `{} recover` to continue.", APP_NAME);
                return Ok(());
            }
            received = events.recv() => match received {
                Ok(event) => {
                    print_event(&event);
                    if event.is_final() && pending.remove(event.instance_id()) {
                        if matches!(event, TrackerEvent::Failed { .. }) {
                            failures += 1;
                        }
                        print_timeline(store, event.instance_id());
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Missed {} progress events", missed),
                Err(RecvError::Closed) => break,
            }
        }
    }

    if failures > 0 {
        return Err(format!("{} workflow(s) failed", failures).into());
    }
    Ok(())
}

async fn run_workflow(config: &Config, store: Arc<dyn SnapshotStore>) -> Result<(), Box<dyn std::error::Error>> {
    let list = match &config.steps_path {
        Some(path) => {
            info!("Loading steps: {}", path);
            load_steps(path).map_err(|e| {
                error!("Failed to load steps: {}", e);
                format!("Could not load steps from '{}': {}", path, e)
            })?
        }
        None => {
            info!("No steps file given; using the sample workflow");
            sample_steps()
        }
    };

    let instance_id = config
        .instance_id
        .clone()
        .unwrap_or_else(|| format!("workflow_{}", Utc::now().timestamp_millis()));
    let title = config.title.clone().or(list.title);

    let tracker = WorkflowTracker::demo(config.tracker_config(), store.clone());
    let events = tracker.events();

    tracker
        .start_titled(&instance_id, title, list.steps)
        .await?;

    if let Some(path) = &config.pause_flag_path {
        info!("Pause control: {}", path.display());
        let _watcher = watch_pause_flag(tracker.clone(), instance_id.clone(), path.clone());
    }

    follow(
        &tracker,
        store.as_ref(),
        events,
        HashSet::from([instance_id]),
    )
    .await
}

async fn recover_workflows(config: &Config, store: Arc<dyn SnapshotStore>) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = WorkflowTracker::demo(config.tracker_config(), store.clone());
    let events = tracker.events();

    let recovered = tracker.recover().await?;
    if recovered.is_empty() {
        println!("Nothing to recover.");
        return Ok(());
    }

    if let Some(path) = &config.pause_flag_path {
        for instance_id in &recovered {
            let _watcher = watch_pause_flag(tracker.clone(), instance_id.clone(), path.clone());
        }
    }

    info!("Recovered {} workflow(s)", recovered.len());
    for instance_id in &recovered {
        if let Some(progress) = tracker.progress(instance_id) {
            println!("{} {} at {}", "recovered".cyan().bold(), instance_id, progress);
        }
    }

    follow(&tracker, store.as_ref(), events, recovered.into_iter().collect()).await
}

fn print_history(store: &dyn SnapshotStore) -> Result<(), Box<dyn std::error::Error>> {
    let history = load_history(store)?;
    if history.is_empty() {
        println!("No finished runs yet.");
        return Ok(());
    }

    for run in &history {
        let outcome = match run.summary.outcome {
            Outcome::Completed => run.summary.outcome.to_string().green(),
            Outcome::Failed => run.summary.outcome.to_string().red(),
        };
        println!(
            "{}  {:<9}  {}  {}",
            run.finished_at.format("%Y-%m-%d %H:%M:%S"),
            outcome,
            run.id,
            run.name.bold()
        );
        println!("    {}", run.description);
    }
    Ok(())
}

/// Main application entry point.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose);

    // Print banner
    print_banner();

    let store = open_store(&config)?;

    match config.command {
        Command::Run => run_workflow(&config, store).await,
        Command::Recover => recover_workflows(&config, store).await,
        Command::History => print_history(store.as_ref()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
