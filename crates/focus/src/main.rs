//! focus - Pomodoro timer with distraction counting
//!
//! Usage:
//!   focus start [--minutes N] [--category C]   Run a focus session
//!   focus report [--json]                       Show focus statistics
//!   focus list [--limit N]                      Show recent sessions
//!   focus clear [--yes]                         Delete all sessions
//!   focus categories                            Show category choices

use std::collections::HashSet;
use std::io::{BufRead, IsTerminal, Write};
use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing_subscriber::EnvFilter;

use focus::stats::WEEKDAY_LABELS;
use focus::{
    FocusStats, SessionStore, StopRequest, TimerController, TimerEvent, TimerSnapshot,
    TimerState, TimerStatus, Visibility,
};
use focus_core::{format, Config, Paths};

/// Focus - Pomodoro timer with distraction counting
#[derive(Parser)]
#[command(name = "focus")]
#[command(about = "Pomodoro timer that counts distractions and reports focus time")]
#[command(version)]
#[command(after_help = r#"WHILE A SESSION RUNS:
    p / <enter>   start or pause
    s             finish early (asks for confirmation)
    bg / fg       report the app leaving / returning to the foreground
    q             quit without saving
    ?             show these commands

EXAMPLES:
    focus start                       # 25-minute session, default category
    focus start -m 50 -c Study        # 50 minutes of Study
    focus report                      # totals, week chart, categories
    focus list --limit 5              # five most recent sessions

ALIASES:
    focus s     # start
    focus r     # report
    focus ls    # list
"#)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a focus session
    #[command(alias = "s")]
    Start {
        /// Session length in minutes (default from config, 25)
        #[arg(short, long, value_name = "MINS")]
        minutes: Option<u32>,

        /// What you're focusing on
        #[arg(short, long)]
        category: Option<String>,
    },

    /// Show focus statistics
    #[command(alias = "r", alias = "stats")]
    Report {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show recent sessions
    #[command(alias = "ls")]
    List {
        /// How many sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Delete all recorded sessions
    Clear {
        /// Don't ask for confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Show the categories offered at session start
    Categories,
}

// ANSI color codes
const GREEN: &str = "\x1b[0;32m";
const YELLOW: &str = "\x1b[0;33m";
const CYAN: &str = "\x1b[0;36m";
const MAGENTA: &str = "\x1b[0;35m";
const BOLD: &str = "\x1b[1m";
const NC: &str = "\x1b[0m";

/// Check if stdout is a TTY and colors should be used
fn use_colors() -> bool {
    std::io::stdout().is_terminal()
}

/// Conditionally apply color
fn color(code: &str, text: &str) -> String {
    if use_colors() {
        format!("{}{}{}", code, text, NC)
    } else {
        text.to_string()
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let paths = Paths::new();
    let config = Config::load(&paths.config_file())?;
    let store = SessionStore::open(&paths.data)
        .with_context(|| format!("Failed to open session store in {}", paths.data.display()))?;

    match cli.command {
        Some(Commands::Start { minutes, category }) => {
            let category = resolve_category(category, &config, std::io::stdin().is_terminal())?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cmd_start(&config, store, minutes, category))
        }
        Some(Commands::Report { json }) => cmd_report(&store, json),
        Some(Commands::List { limit }) => cmd_list(&store, limit),
        Some(Commands::Clear { yes }) => cmd_clear(&store, yes),
        Some(Commands::Categories) => cmd_categories(&config),
        None => cmd_report(&store, false),
    }
}

fn print_commands() {
    println!("  p/<enter> start/pause   s finish   bg/fg leave/return   q quit");
}

fn render(snapshot: &TimerSnapshot) {
    let code = match snapshot.status {
        TimerStatus::Running => GREEN,
        TimerStatus::Paused => YELLOW,
        TimerStatus::Idle => CYAN,
    };
    let status = color(code, &format!("{:<7}", snapshot.status.as_str()));
    print!(
        "\r  {}  {}  distractions: {}   ",
        color(BOLD, &snapshot.clock),
        status,
        snapshot.distractions
    );
    let _ = std::io::stdout().flush();
}

/// Category from `--category`, or picked from the configured list when
/// stdin is a terminal. Falls back to the default category otherwise.
fn resolve_category(
    explicit: Option<String>,
    config: &Config,
    interactive: bool,
) -> Result<String> {
    if let Some(category) = explicit {
        return Ok(category);
    }
    if !interactive || config.categories.is_empty() {
        return Ok(config.fallback_category().to_string());
    }
    let stdin = std::io::stdin();
    pick_category(config, stdin.lock(), std::io::stdout())
}

/// Numbered category menu. Enter keeps the default, a number picks from the
/// list and anything else is taken as a new category name.
fn pick_category<R: BufRead, W: Write>(
    config: &Config,
    mut input: R,
    mut out: W,
) -> Result<String> {
    let fallback = config.fallback_category();
    writeln!(out, "{}", color(CYAN, "Category:"))?;
    for (i, category) in config.categories.iter().enumerate() {
        let marker = if category == fallback { " (default)" } else { "" };
        writeln!(out, "  {}. {}{}", i + 1, category, marker)?;
    }
    write!(out, "Pick [{}]: ", fallback)?;
    out.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim();
    if answer.is_empty() {
        return Ok(fallback.to_string());
    }
    match answer.parse::<usize>() {
        Ok(n) => match config.categories.get(n.wrapping_sub(1)) {
            Some(category) => Ok(category.clone()),
            None => anyhow::bail!("No category numbered {}", n),
        },
        Err(_) => Ok(answer.to_string()),
    }
}

/// Run one interactive session
async fn cmd_start(
    config: &Config,
    store: SessionStore,
    minutes: Option<u32>,
    category: String,
) -> Result<()> {
    let secs = minutes
        .map(|m| m.saturating_mul(60))
        .unwrap_or_else(|| config.focus_seconds());
    let secs = NonZeroU32::new(secs).context("Session length must be at least one minute")?;

    let timer = TimerState::new(secs, Some(&category));
    let controller = TimerController::new(
        timer,
        store,
        Duration::from_millis(config.tick_millis.max(1)),
    );
    let (host, changes) = mpsc::channel(16);
    controller.attach_lifecycle(changes);
    let mut events = controller.subscribe();

    let snapshot = controller.snapshot();
    println!("{}", color(&format!("{}{}", BOLD, MAGENTA), "FOCUS MODE"));
    println!();
    println!("  {}  {}", color(CYAN, "Duration:"), format::clock(u64::from(snapshot.configured_secs)));
    println!("  {}  {}", color(CYAN, "Category:"), snapshot.category);
    println!();
    print_commands();
    println!();

    controller.start();
    render(&controller.snapshot());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut awaiting_confirm = false;
    let mut pending_saves: HashSet<String> = HashSet::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim().to_lowercase();

                if awaiting_confirm {
                    awaiting_confirm = false;
                    if input == "y" || input == "yes" {
                        if controller.confirm_stop().is_none() {
                            println!("  Nothing to save");
                        }
                    } else {
                        println!("  Keep going");
                        render(&controller.snapshot());
                    }
                    continue;
                }

                match input.as_str() {
                    "" | "p" => {
                        controller.toggle();
                    }
                    "s" => match controller.request_stop() {
                        StopRequest::Reset => println!("\n  Timer reset"),
                        StopRequest::Confirm(prompt) => {
                            print!(
                                "\n  Finish now and save {} of {}? [y/N] ",
                                format::clock(u64::from(prompt.elapsed)),
                                prompt.category
                            );
                            let _ = std::io::stdout().flush();
                            awaiting_confirm = true;
                        }
                    },
                    "q" | "quit" => break,
                    "?" | "help" => print_commands(),
                    other => match Visibility::from_str(other) {
                        Some(visibility) => {
                            let _ = host.send(visibility).await;
                        }
                        None => println!("\n  Unknown command '{}', ? for help", other),
                    },
                }
            }
            event = events.recv() => match event {
                Ok(TimerEvent::StateChanged(snapshot)) => {
                    if !awaiting_confirm {
                        render(&snapshot);
                    }
                }
                Ok(TimerEvent::SessionCompleted(session)) => {
                    pending_saves.insert(session.id.clone());
                    println!();
                    if session.is_finished {
                        println!("{}", color(GREEN, "Session complete! Take a break."));
                    } else {
                        println!("{} Session finished early", color(GREEN, "[ok]"));
                    }
                    println!(
                        "  Focused {} on {}, {} distraction(s)",
                        format::duration(u64::from(session.duration)),
                        session.category,
                        session.distractions
                    );
                }
                Ok(TimerEvent::SessionPersisted { id }) => {
                    pending_saves.remove(&id);
                }
                Ok(TimerEvent::PersistFailed { id, error }) => {
                    pending_saves.remove(&id);
                    eprintln!("\n{} Could not save session: {}", color(YELLOW, "[warn]"), error);
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => break,
        }
    }

    let discarded = controller.snapshot();
    controller.shutdown();
    println!();
    if discarded.status != TimerStatus::Idle {
        println!("  Left with {} remaining, progress not saved", discarded.clock);
    }

    // let in-flight writes land before the process exits
    let drain = async {
        while !pending_saves.is_empty() {
            match events.recv().await {
                Ok(TimerEvent::SessionPersisted { id }) | Ok(TimerEvent::PersistFailed { id, .. }) => {
                    pending_saves.remove(&id);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), drain).await.is_err() {
        tracing::warn!("gave up waiting for session writes");
    }

    Ok(())
}

/// Show focus statistics
fn cmd_report(store: &SessionStore, json: bool) -> Result<()> {
    let sessions = store.load_or_empty();
    let stats = FocusStats::from_sessions(&sessions);

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}Focus Report{}", BOLD, NC);
    println!();
    println!("  {}        {}", color(CYAN, "Today:"), format::clock(stats.total_today));
    println!("  {}     {}", color(CYAN, "All time:"), format::clock(stats.total_all_time));
    println!("  {}     {}", color(CYAN, "Sessions:"), stats.total_sessions);
    println!(
        "  {}     {} ({}%)",
        color(CYAN, "Finished:"),
        stats.finished_sessions,
        stats.completion_rate
    );
    println!("  {} {}", color(CYAN, "Distractions:"), stats.total_distractions);

    println!();
    println!("{}Last 7 days{}", BOLD, NC);
    let peak = stats.last_seven_days.iter().copied().max().unwrap_or(0);
    for (label, secs) in WEEKDAY_LABELS.iter().zip(stats.last_seven_days.iter()) {
        let width = if peak == 0 { 0 } else { (secs * 30 / peak) as usize };
        println!("  {} {:<30} {}", label, "\u{2588}".repeat(width), format::duration(*secs));
    }

    let categories = stats.categories_by_time();
    if !categories.is_empty() {
        println!();
        println!("{}Categories{}", BOLD, NC);
        for (name, secs) in categories {
            println!(
                "  {:<16} {:>8}  {:>3}%",
                format::truncate(name, 16),
                format::clock(secs),
                stats.category_share(name)
            );
        }
    }

    if let Some(last) = sessions.first() {
        println!();
        println!(
            "  {} {} {} ({})",
            color(CYAN, "Last session:"),
            format::timestamp(last.date),
            format::duration(u64::from(last.duration)),
            last.category
        );
    }

    Ok(())
}

/// Show recent sessions, newest first
fn cmd_list(store: &SessionStore, limit: usize) -> Result<()> {
    let sessions = store.load_or_empty();
    if sessions.is_empty() {
        println!("No sessions yet");
        println!();
        println!("Start one with: focus start");
        return Ok(());
    }

    for session in sessions.iter().take(limit) {
        let outcome = if session.is_finished {
            color(GREEN, "finished")
        } else {
            color(YELLOW, "stopped ")
        };
        println!(
            "  {}  {:>8}  {}  {:<16} {} distraction(s)",
            format::timestamp(session.date),
            format::clock(u64::from(session.duration)),
            outcome,
            format::truncate(&session.category, 16),
            session.distractions
        );
    }

    if sessions.len() > limit {
        println!("  ... {} more", sessions.len() - limit);
    }
    Ok(())
}

/// Delete all sessions
fn cmd_clear(store: &SessionStore, yes: bool) -> Result<()> {
    if !yes {
        print!("Delete all recorded sessions? [y/N] ");
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("Nothing deleted");
            return Ok(());
        }
    }

    store.clear()?;
    println!("{} All sessions deleted", color(GREEN, "[ok]"));
    Ok(())
}

/// Show category choices
fn cmd_categories(config: &Config) -> Result<()> {
    let fallback = config.fallback_category();
    for category in &config.categories {
        if category == fallback {
            println!("  {} (default)", category);
        } else {
            println!("  {}", category);
        }
    }
    Ok(())
}
