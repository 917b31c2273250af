use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Context, Result, bail, eyre};
use pomotrack::{
    Background, Config, DateKey, Notifier, OutcomeTag, PauseOutcome, Phase, Snapshot, StateService, StatsHistory,
    StoreClock, TimerController, TracingNotifier, UiSignal, now_ms,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pomotrack")]
#[command(about = "Pomodoro focus timer with goal tracking and session statistics")]
#[command(version = env!("GIT_DESCRIBE"))]
struct Cli {
    /// Path to the store directory (default: <data dir>/pomotrack)
    #[arg(short, long)]
    store_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current phase and time left
    Status {
        /// Print the timer snapshot as JSON
        #[arg(long)]
        json: bool,

        /// Keep refreshing once per second
        #[arg(long)]
        watch: bool,
    },

    /// Start (or resume) the current phase
    Start,

    /// Pause the running phase, keeping the time left
    Pause,

    /// Stop and go back to a fresh work phase
    Reset,

    /// Record how today's session went
    Mark {
        /// productive or interrupted
        outcome: OutcomeTag,
    },

    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },

    /// Show session statistics
    Stats {
        /// Year to chart (default: this year)
        #[arg(long)]
        year: Option<i32>,

        /// Print every recorded day as CSV
        #[arg(long)]
        csv: bool,
    },

    /// Delete all session statistics
    ClearStats {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Run the background loop that ends phases and checks goals
    Run {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        poll_ms: u64,

        /// Print UI signals as JSON lines instead of ringing the bell
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the SQLite cache from the JSONL files
    Sync,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the current settings
    Show {
        #[arg(long)]
        yaml: bool,
    },

    /// Change individual settings
    Set {
        #[arg(long)]
        work: Option<u32>,

        #[arg(long)]
        short_break: Option<u32>,

        #[arg(long)]
        long_break: Option<u32>,

        /// Work sessions per long break
        #[arg(long)]
        cycles: Option<u32>,

        #[arg(long)]
        daily_goal: Option<u32>,

        #[arg(long)]
        weekly_goal: Option<u32>,

        #[arg(long)]
        sound: Option<bool>,
    },

    /// Write the settings to a YAML file
    Export { file: PathBuf },

    /// Replace the settings with a YAML file
    Import { file: PathBuf },
}

/// Prints notifications to the terminal
struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn notify(&self, title: &str, message: &str) {
        println!("{} {}", format!("{}:", title).bold().yellow(), message);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(matches!(cli.command, Commands::Run { .. }));

    let store_path = match cli.store_path {
        Some(path) => path,
        None => default_store_path()?,
    };
    let now = now_ms();

    match cli.command {
        Commands::Status { json, watch } => {
            let timer = open_timer(&store_path, TerminalNotifier)?;
            if watch {
                watch_status(&timer)?;
            } else if json {
                println!("{}", serde_json::to_string_pretty(&timer.snapshot(now)?)?);
            } else {
                print_status(&timer.snapshot(now)?);
            }
        }
        Commands::Start => {
            let mut timer = open_timer(&store_path, TerminalNotifier)?;
            let started = timer.start(now)?;
            println!("Started {} ({} min)", phase_label(started.phase), started.duration_minutes);
        }
        Commands::Pause => {
            let mut timer = open_timer(&store_path, TerminalNotifier)?;
            match timer.pause(now)? {
                PauseOutcome::Paused(paused) => {
                    println!("Paused {} ({} min left)", phase_label(paused.phase), paused.duration_minutes);
                }
                PauseOutcome::Completed(transition) => {
                    println!(
                        "Phase already over; next up: {} ({} min)",
                        phase_label(transition.next.phase),
                        transition.next.duration_minutes
                    );
                }
            }
        }
        Commands::Reset => {
            let mut timer = open_timer(&store_path, TerminalNotifier)?;
            let reset = timer.reset()?;
            println!("Reset to {} ({} min)", phase_label(reset.phase), reset.duration_minutes);
        }
        Commands::Mark { outcome } => {
            let mut state = StateService::open(&store_path)?;
            let day = state.record_outcome(DateKey::from_millis(now), outcome)?;
            println!("Marked session as {} ({} today)", outcome, day.tags.len());
        }
        Commands::Config { action } => {
            let mut state = StateService::open(&store_path)?;
            handle_config(&mut state, action)?;
        }
        Commands::Stats { year, csv } => {
            let state = StateService::open(&store_path)?;
            let history = state.stats_history()?;
            if csv {
                print!("{}", history.to_csv());
            } else {
                let today = DateKey::from_millis(now);
                let year = year.unwrap_or(today.year());
                print_stats(&history, &state.stats_for_year(year)?, today, year);
            }
        }
        Commands::ClearStats { yes } => {
            if !yes {
                bail!("Refusing to delete all statistics without --yes");
            }
            let mut state = StateService::open(&store_path)?;
            let removed = state.clear_stats_history()?;
            println!("Cleared statistics ({} records)", removed);
        }
        Commands::Run { poll_ms, json } => {
            let poll = Duration::from_millis(poll_ms.max(10));
            if json {
                run_daemon(open_timer(&store_path, TracingNotifier)?, poll, true)?;
            } else {
                run_daemon(open_timer(&store_path, TerminalNotifier)?, poll, false)?;
            }
        }
        Commands::Sync => {
            println!("Syncing database from JSONL files...");
            let mut state = StateService::open(&store_path)?;
            let loaded = state.resync()?;
            println!("Sync complete ({} records)", loaded);
        }
    }

    Ok(())
}

fn init_tracing(daemon: bool) {
    let default = if daemon { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn default_store_path() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join("pomotrack"))
        .ok_or_else(|| eyre!("Could not determine the user data directory, pass --store-path"))
}

fn open_timer<N: Notifier>(path: &Path, notifier: N) -> Result<TimerController<StoreClock, N>> {
    Ok(TimerController::new(
        StateService::open(path)?,
        StoreClock::open(path)?,
        notifier,
        Default::default(),
    ))
}

fn phase_label(phase: Phase) -> colored::ColoredString {
    match phase {
        Phase::Work => "work".red().bold(),
        Phase::Break => "break".green().bold(),
    }
}

fn print_status(snapshot: &Snapshot) {
    let phase = if snapshot.is_work_phase { Phase::Work } else { Phase::Break };
    let state = if snapshot.is_running {
        "running".bold()
    } else {
        "paused".dimmed()
    };
    println!(
        "{} {} {}  (cycles: {})",
        phase_label(phase),
        snapshot.countdown().bold(),
        state,
        snapshot.completed_cycles
    );
}

// Redraws in place; derived values only, nothing is written back
fn watch_status<N: Notifier>(timer: &TimerController<StoreClock, N>) -> Result<()> {
    let mut stdout = std::io::stdout();
    loop {
        let snapshot = timer.snapshot(now_ms())?;
        let phase = if snapshot.is_work_phase { "Work" } else { "Break" };
        let marker = if snapshot.is_running { ">" } else { "||" };
        write!(stdout, "\r{} {:<5} {}  cycles: {}   ", marker, phase, snapshot.countdown(), snapshot.completed_cycles)?;
        stdout.flush()?;
        thread::sleep(Duration::from_secs(1));
    }
}

fn handle_config(state: &mut StateService, action: ConfigCommand) -> Result<()> {
    match action {
        ConfigCommand::Show { yaml } => {
            let config = state.config()?;
            if yaml {
                print!("{}", serde_yaml::to_string(&config)?);
            } else {
                print_config(&config);
            }
        }
        ConfigCommand::Set {
            work,
            short_break,
            long_break,
            cycles,
            daily_goal,
            weekly_goal,
            sound,
        } => {
            let current = state.config()?;
            let config = Config {
                work_minutes: work.unwrap_or(current.work_minutes),
                short_break_minutes: short_break.unwrap_or(current.short_break_minutes),
                long_break_minutes: long_break.unwrap_or(current.long_break_minutes),
                cycles: cycles.unwrap_or(current.cycles),
                daily_goal: daily_goal.unwrap_or(current.daily_goal),
                weekly_goal: weekly_goal.unwrap_or(current.weekly_goal),
                sound_enabled: sound.unwrap_or(current.sound_enabled),
            };
            state.save_config(&config)?;
            println!("{}", "Settings saved".green());
            print_config(&config);
        }
        ConfigCommand::Export { file } => {
            let yaml = serde_yaml::to_string(&state.config()?)?;
            fs::write(&file, yaml).with_context(|| format!("Failed to write {}", file.display()))?;
            println!("Exported settings to {}", file.display());
        }
        ConfigCommand::Import { file } => {
            let content = fs::read_to_string(&file).with_context(|| format!("Failed to read {}", file.display()))?;
            let config: Config = serde_yaml::from_str(&content).context("Invalid settings file")?;
            state.save_config(&config)?;
            println!("Imported settings from {}", file.display());
        }
    }
    Ok(())
}

fn print_config(config: &Config) {
    println!("work:        {} min", config.work_minutes);
    println!("short break: {} min", config.short_break_minutes);
    println!("long break:  {} min", config.long_break_minutes);
    println!("cycles:      {}", config.cycles);
    println!("daily goal:  {}", config.daily_goal);
    println!("weekly goal: {}", config.weekly_goal);
    println!("sound:       {}", if config.sound_enabled { "on" } else { "off" });
}

fn print_stats(all: &StatsHistory, year_stats: &StatsHistory, today: DateKey, year: i32) {
    let week = all.weekly_total(StatsHistory::week_start(today));
    println!("{} {}", "Total:".bold(), all.total());
    println!("{} {}", "Today:".bold(), all.daily_total(today));
    println!("{} {}", "Last 7 days:".bold(), all.trailing_total(today, 7));
    println!("{} {}", "This week:".bold(), week);

    let tally = all.outcome_tally(today);
    if tally.productive + tally.interrupted > 0 {
        println!(
            "{} {} productive, {} interrupted",
            "Marked today:".bold(),
            tally.productive.to_string().green(),
            tally.interrupted.to_string().red()
        );
    }

    let mut years = all.years();
    if !years.contains(&today.year()) {
        years.push(today.year());
        years.sort_unstable();
    }
    let years: Vec<String> = years.iter().map(|y| y.to_string()).collect();
    println!("{} {}", "Years:".bold(), years.join(" "));

    println!();
    println!("{}", format!("{}", year).bold().underline());
    let series = year_stats.year_series(year);
    if series.is_empty() {
        println!("{}", "no sessions recorded".dimmed());
    }
    for (date, count) in series {
        println!("{}  {} {}", date, "#".repeat(count as usize).red(), count);
    }
}

fn run_daemon<N: Notifier>(timer: TimerController<StoreClock, N>, poll: Duration, json: bool) -> Result<()> {
    let signals = timer.signals().subscribe();
    thread::spawn(move || present_signals(signals, json));

    let shutdown = AtomicBool::new(false);
    Background::new(timer).run(poll, &shutdown)
}

fn present_signals(mut signals: broadcast::Receiver<UiSignal>, json: bool) {
    loop {
        let signal = match signals.blocking_recv() {
            Ok(signal) => signal,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if json {
            if let Ok(line) = serde_json::to_string(&signal) {
                println!("{}", line);
            }
            continue;
        }

        match signal {
            UiSignal::PlaySound => {
                print!("\x07");
                let _ = std::io::stdout().flush();
            }
            UiSignal::PhaseChanged { phase, duration_minutes } => {
                println!("Next: {} ({} min), run `pomotrack start`", phase_label(phase), duration_minutes);
            }
        }
    }
}
