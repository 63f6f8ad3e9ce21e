use anyhow::Context;
use clap::Parser;
use envirotrack::cli::{Cli, Command};
use envirotrack::config::EngineConfig;
use envirotrack::error::exit_code;
use envirotrack::metrics::MetricsAggregator;
use envirotrack::store::{AggregateStore, SqliteStore};
use envirotrack::tracker::Tracker;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::from(exit_code::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {e:#}");
            if let Some(err) = e.downcast_ref::<envirotrack::Error>() {
                ExitCode::from(err.exit_code() as u8)
            } else {
                ExitCode::from(exit_code::GENERAL_ERROR as u8)
            }
        }
    }
}

fn init_tracing(cli: &Cli) {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("ENVIROTRACK_LOG")
                .unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    cli.validate()
        .map_err(envirotrack::Error::InvalidArgument)
        .context("Invalid arguments")?;

    if let Command::Completions { shell } = cli.command {
        use clap::CommandFactory;
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "envirotrack", &mut std::io::stdout());
        return Ok(());
    }

    let mut config = EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = cli.db.clone() {
        config.store.path = Some(db);
    }

    let db_path = config.effective_store_path();
    tracing::debug!(path = %db_path.display(), "opening store");
    let store = Arc::new(
        SqliteStore::open(&db_path, config.capacities())
            .with_context(|| format!("Failed to open {}", db_path.display()))?,
    );

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    match cli.command {
        Command::Ingest { file, sweep_every } => {
            let sweep_every = sweep_every.unwrap_or_else(|| config.effective_sweep_interval());
            rt.block_on(async {
                let tracker = Tracker::open(store, &config).await?;
                envirotrack::commands::ingest::run(&tracker, &file, sweep_every).await
            })?;
        }
        Command::Stats { json, csv } => {
            rt.block_on(envirotrack::commands::stats::run(&*store, json, csv))?;
        }
        Command::Daily { days, json } => {
            rt.block_on(envirotrack::commands::daily::run(&*store, days, json))?;
        }
        Command::Log => {
            rt.block_on(envirotrack::commands::log::run(&*store))?;
        }
        Command::History { limit } => {
            rt.block_on(envirotrack::commands::history::run(&*store, limit))?;
        }
        Command::Reset { yes } => {
            if !yes && !envirotrack::commands::reset::confirm("Clear all statistics?")? {
                eprintln!("Aborted.");
                return Ok(());
            }
            let aggregator = MetricsAggregator::from_config(store, &config);
            rt.block_on(async {
                aggregator.resume_from(aggregator.store().last_update().await?);
                envirotrack::commands::reset::run(&aggregator).await
            })?;
        }
        Command::View { refresh } => {
            let aggregator = MetricsAggregator::from_config(store, &config);
            envirotrack::commands::view::run(&rt, &aggregator, refresh)?;
        }
        Command::Query { sql } => {
            envirotrack::commands::query::run(&store, &sql)?;
        }
        Command::Completions { .. } => unreachable!("handled before the store is opened"),
    }

    Ok(())
}
