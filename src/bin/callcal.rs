use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use callcal::{AddressBook, CallCal, CallHistoryDb, Database, GoogleCalendar, RunLock};

#[derive(Parser)]
#[command(name = "callcal", about = "Sync macOS call history to a Google calendar")]
struct Cli {
    /// Sync database path (default: ~/Library/Application Support/CallTrackingCalendar/sync.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Call history database (default: the system CallHistory.storedata)
    #[arg(long)]
    call_db: Option<PathBuf>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl callcal::SyncProgress for StderrProgress {
    fn on_calendar_resolved(&self, calendar: &callcal::CalendarRef, reset: bool) {
        eprintln!("Calendar: {} ({})", calendar.name, calendar.id);
        if reset {
            eprintln!("  Calendar changed since the last sync; all calls will be re-created");
        }
    }

    fn on_calls_fetched(&self, fetched: usize, to_sync: usize) {
        eprintln!("Found {fetched} calls, {to_sync} to sync");
    }

    fn on_call_progress(&self, current: usize, total: usize) {
        if current == total {
            eprint!("\r  Creating events: {}/{}   \n", current, total);
        } else {
            eprint!("\r  Creating events: {}/{}   ", current, total);
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create calendar events for new calls
    Sync {
        /// Only calls from the last N days
        #[arg(long)]
        days: Option<u32>,
        /// Only calls on or after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
        /// Include unanswered and missed calls
        #[arg(long)]
        all_calls: bool,
        /// Show what would be synced without creating anything
        #[arg(long)]
        dry_run: bool,
        /// Skip the address book lookup for unnamed calls
        #[arg(long)]
        no_contacts: bool,
        /// Output the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show sync state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Delete the event for a call and forget that it was synced
    Unsync {
        /// Call unique id
        call_id: String,
    },
    /// Forget every synced call (events stay in the calendar)
    Reset,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

fn parse_since(since: Option<&str>) -> anyhow::Result<Option<chrono::NaiveDate>> {
    since
        .map(|s| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("invalid --since date '{s}', expected YYYY-MM-DD"))
        })
        .transpose()
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let db_path = match cli.db {
        Some(path) => path,
        None => Database::default_path()?,
    };
    let call_db_path = match cli.call_db {
        Some(path) => path,
        None => CallHistoryDb::default_path()?,
    };
    let db = Database::open_at(&db_path).await?;

    match cli.command {
        Commands::Sync {
            days,
            since,
            all_calls,
            dry_run,
            no_contacts,
            json,
        } => {
            let _lock = RunLock::acquire(RunLock::path_for(&db_path))?;
            let source = CallHistoryDb::new(call_db_path);
            if !source.exists() {
                anyhow::bail!("Call history not found at {}", source.path().display());
            }
            let calendar = GoogleCalendar::from_env()?;

            let mut cc = CallCal::new(db, Arc::new(source), Arc::new(calendar));
            if !no_contacts {
                match AddressBook::default_path() {
                    Ok(path) if path.exists() => {
                        cc = cc.with_contacts(Arc::new(AddressBook::new(path)));
                    }
                    Ok(path) => log::info!("No address book at {}", path.display()),
                    Err(e) => log::warn!("Skipping contact lookup: {e}"),
                }
            }

            let config = cc.app_config().await?;
            let window =
                config.default_window(parse_since(since.as_deref())?, days, chrono::Utc::now());
            let mut options = config.sync_options();
            options.dry_run = dry_run;
            if all_calls {
                options.answered_only = false;
            }

            let summary = if json {
                cc.run_sync(window, &options, &callcal::NoopProgress).await?
            } else {
                cc.run_sync(window, &options, &StderrProgress).await?
            };

            if json {
                let mut value = serde_json::to_value(&summary)?;
                value["status"] = serde_json::json!(summary.status());
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print_summary(&summary);
            }
            if !summary.is_success() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status { json } => {
            print_status(&CallCal::local(db), &db_path, &call_db_path, json).await?;
        }
        Commands::Config { action } => {
            handle_config(&CallCal::local(db), action).await?;
        }
        Commands::Unsync { call_id } => {
            let _lock = RunLock::acquire(RunLock::path_for(&db_path))?;
            let calendar = GoogleCalendar::from_env()?;
            let cc = CallCal::new(
                db,
                Arc::new(CallHistoryDb::new(call_db_path)),
                Arc::new(calendar),
            );
            if cc.unsync(&call_id).await? {
                println!("Unsynced {call_id}; it will be re-created on the next sync.");
            } else {
                println!("Call {call_id} is not synced.");
            }
        }
        Commands::Reset => {
            let _lock = RunLock::acquire(RunLock::path_for(&db_path))?;
            let cleared = CallCal::local(db).reset().await?;
            println!("Forgot {cleared} synced calls.");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(summary: &callcal::SyncSummary) {
    let label = if summary.dry_run { "Dry run" } else { "Sync" };
    println!("{label}: {}", summary.status().as_str());
    if let Some(ref calendar) = summary.calendar {
        println!("  Calendar:  {}", calendar.name);
    }
    println!("  Seen:      {} calls", summary.calls_seen);
    if summary.dry_run {
        println!("  Would sync: {} calls", summary.calls_synced);
    } else {
        println!("  Synced:    {} calls", summary.calls_synced);
    }
    println!(
        "  Skipped:   {} duplicate, {} already synced, {} unanswered",
        summary.calls_skipped_duplicate,
        summary.calls_skipped_already_synced,
        summary.calls_skipped_unanswered
    );
    println!("  Failed:    {} calls", summary.calls_failed);
    if summary.calls_not_attempted > 0 {
        println!("  Not attempted: {} calls", summary.calls_not_attempted);
    }
    for failure in &summary.failures {
        println!(
            "    {} ({:?}): {}",
            failure.call_id, failure.kind, failure.message
        );
    }
    if let Some(ref reason) = summary.aborted {
        println!("  Aborted:   {reason}");
    }
}

async fn print_status(
    cc: &CallCal,
    db_path: &std::path::Path,
    call_db_path: &std::path::Path,
    json: bool,
) -> anyhow::Result<()> {
    let info = cc.get_sync_status().await?;
    let config = cc.app_config().await?;
    let call_db = CallHistoryDb::new(call_db_path);
    let readable = call_db.is_readable().await;
    let running = RunLock::is_held(&RunLock::path_for(db_path));

    if json {
        let value = serde_json::json!({
            "status": info,
            "config": config,
            "call_history": {
                "path": call_db.path().display().to_string(),
                "readable": readable,
            },
            "sync_running": running,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Sync Status");
    println!(
        "  Calendar:     {}",
        match (&info.bound_calendar_name, &info.bound_calendar_id) {
            (Some(name), Some(id)) => format!("{name} ({id})"),
            _ => "not bound".to_string(),
        }
    );
    println!("  Synced calls: {}", info.synced_count);
    println!(
        "  Last sync:    {}",
        info.last_run_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    if let Some(ref run) = info.last_run {
        println!(
            "  Last result:  {} ({} synced, {} failed)",
            run.status, run.calls_synced, run.calls_failed
        );
    }
    println!(
        "  Call history: {} ({})",
        call_db.path().display(),
        if readable {
            "readable"
        } else {
            "not readable, check Full Disk Access"
        }
    );
    if readable {
        match call_db.total_call_count().await {
            Ok(count) => println!("  Total calls:  {count}"),
            Err(e) => log::warn!("Could not count calls: {e}"),
        }
    }
    if running {
        match RunLock::holder_pid(&RunLock::path_for(db_path)) {
            Some(pid) => println!("  A sync is currently running (pid {pid})."),
            None => println!("  A sync is currently running."),
        }
    }
    Ok(())
}

async fn handle_config(cc: &CallCal, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match cc.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            cc.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = cc.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}
