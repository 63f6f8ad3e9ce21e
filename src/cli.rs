use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "envirotrack")]
#[command(about = "Energy, carbon and water footprint of AI-service requests")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (TOML)
    #[arg(long, short = 'c', global = true, env = "ENVIROTRACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database path (overrides store.path)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay JSON-lines request events into the store
    Ingest {
        /// Event file, or `-` for stdin
        #[arg(default_value = "-")]
        file: PathBuf,

        /// Period of the stale-request sweeper (overrides pending.sweep_interval_secs)
        #[arg(long, value_parser = parse_duration)]
        sweep_every: Option<Duration>,
    },

    /// Per-platform totals
    Stats {
        /// Output as JSON
        #[arg(long, conflicts_with = "csv")]
        json: bool,

        /// Output as CSV
        #[arg(long)]
        csv: bool,
    },

    /// Per-day, per-platform totals
    Daily {
        /// Number of most recent days to show
        #[arg(long, short = 'd', default_value = "7")]
        days: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnostic event log, oldest first
    Log,

    /// Recently aggregated requests, oldest first
    History {
        /// Only show the last N entries
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },

    /// Clear all aggregates, history and the diagnostic log
    Reset {
        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Interactive live view of the store
    View {
        /// Full refresh period
        #[arg(long, default_value = "2s", value_parser = parse_duration)]
        refresh: Duration,
    },

    /// Execute raw SQL on the database
    Query {
        /// SQL query to execute
        sql: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    if let Ok(d) = humantime::parse_duration(s) {
        return Ok(d);
    }

    // Bare number as seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    Err(format!(
        "Invalid duration '{}'. Examples: 500ms, 2s, 1m, 90",
        s
    ))
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Command::View { refresh } if refresh.is_zero() => {
                Err("Refresh period must be greater than zero".to_string())
            }
            Command::Ingest {
                sweep_every: Some(d),
                ..
            } if d.is_zero() => Err("Sweep period must be greater than zero".to_string()),
            Command::Daily { days: 0, .. } => Err("--days must be at least 1".to_string()),
            _ => Ok(()),
        }
    }

    /// Default tracing filter for the `-v` count; `ENVIROTRACK_LOG` wins when set.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "envirotrack=info,warn",
            2 => "envirotrack=debug,info",
            _ => "trace",
        }
    }
}
