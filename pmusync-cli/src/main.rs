//! pmusync CLI: collect one day of PMU frequency data from the historian.
//!
//! Commands:
//! - `run`: query every (subset, window) pair, archive the result, upload it
//! - `plan`: show the windows and subsets a run would query, without querying
//! - `check`: validate a config file and print the resolved settings

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pmusync_core::{CollectorConfig, HttpHistorian, WindowPlan};
use pmusync_runner::{
    build_store, preview, ArchiveRegistry, Collector, CommandCompressor, RunReport, RunStatus,
};

#[derive(Parser)]
#[command(
    name = "pmusync",
    version,
    about = "Chunked, time-windowed collection of PMU frequency data"
)]
struct Cli {
    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect, archive and upload one run.
    Run {
        /// Path to the TOML config file.
        #[arg(long, default_value = "pmusync.toml")]
        config: PathBuf,

        /// Collect a specific day (YYYY-MM-DD) instead of the configured repetition.
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Print the run report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show the planned windows and subsets without querying.
    Plan {
        /// Path to the TOML config file.
        #[arg(long, default_value = "pmusync.toml")]
        config: PathBuf,

        /// Plan a specific day (YYYY-MM-DD) instead of the configured repetition.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Validate a config file.
    Check {
        /// Path to the TOML config file.
        #[arg(long, default_value = "pmusync.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run { config, date, json } => run_collect(&config, date, json),
        Commands::Plan { config, date } => run_plan(&config, date).map(|()| ExitCode::SUCCESS),
        Commands::Check { config } => run_check(&config).map(|()| ExitCode::SUCCESS),
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .init();
}

fn load_config(path: &Path, date: Option<NaiveDate>) -> Result<CollectorConfig> {
    let config = CollectorConfig::from_file(path)
        .with_context(|| format!("loading config {}", path.display()))?;
    Ok(match date {
        Some(date) => config.with_once_date(date),
        None => config,
    })
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn run_collect(config_path: &Path, date: Option<NaiveDate>, json: bool) -> Result<ExitCode> {
    let config = load_config(config_path, date)?;

    let registry = ArchiveRegistry::new(&config.archive.directory);
    let historian = HttpHistorian::new(&config.query.base_url, config.query.timeout())?;
    let store = build_store(&config.storage)?;
    let compressor = CommandCompressor::from_config(&config.compression);
    info!(store = %store.describe(), "storage ready");

    let report = Collector::new(&config, &registry, &historian, store.as_ref(), &compressor)
        .run(today())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(report: &RunReport) {
    println!();
    println!("=== Collection Run ===");
    if report.status == RunStatus::RegistryNotFound {
        println!("No instrument archive found; nothing collected.");
        return;
    }
    println!("Anchor:         {}", report.anchor);
    println!("Output file:    {}", report.output_file);
    println!("Instruments:    {}", report.instruments);
    println!(
        "Pairs:          {} ({} subsets x {} windows)",
        report.pairs(),
        report.subsets,
        report.windows_per_subset
    );
    println!("Attempts:       {}", report.attempts);
    println!();
    println!("--- Outcomes ---");
    println!("Succeeded:      {}", report.succeeded);
    println!("No data:        {}", report.no_data);
    println!("Exhausted:      {}", report.exhausted);
    println!("Fragments:      {}", report.fragments);
    if let Some(handoff) = &report.handoff {
        println!("Handoff:        {handoff:?}");
    }
    if report.exhausted > 0 {
        println!();
        println!("WARNING: {} pairs produced no data; see the summary log", report.exhausted);
    }
}

fn run_plan(config_path: &Path, date: Option<NaiveDate>) -> Result<()> {
    let config = load_config(config_path, date)?;
    let registry = ArchiveRegistry::new(&config.archive.directory);
    let plan = preview(&config, &registry, today())?;

    println!("Anchor:         {}", plan.anchor);
    println!(
        "Daylight saving: {}",
        if plan.daylight_saving_applied { "applied" } else { "not applied" }
    );
    println!("Output file:    {}", plan.output_file);
    println!();
    println!("Windows ({}):", plan.windows.len());
    for window in &plan.windows {
        println!("  {window}");
    }
    println!();
    match &plan.subsets {
        Some(subsets) => {
            println!("Subsets ({}):", subsets.len());
            for (i, ids) in subsets.iter().enumerate() {
                let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
                println!("  #{i:<3} {}", ids.join(","));
            }
            println!();
            println!("Calls: {}", subsets.len() * plan.windows.len());
        }
        None => println!(
            "No instrument archive found in {}",
            config.archive.directory.display()
        ),
    }
    Ok(())
}

fn run_check(config_path: &Path) -> Result<()> {
    let config = load_config(config_path, None)?;
    let plan = WindowPlan::build(&config.schedule, today())?;

    println!("Config OK: {}", config_path.display());
    println!();
    println!("Archive dir:    {}", config.archive.directory.display());
    println!("Schedule:       {} ({:?})", config.schedule.time, config.schedule.repetition);
    println!(
        "Windows:        {} x {}h (horizon {}h, remainder {:?})",
        plan.count(),
        config.schedule.window_hours,
        config.schedule.horizon_hours,
        config.schedule.remainder
    );
    if let Some(dst) = &config.schedule.daylight_saving {
        println!("Daylight saving: {} to {}", dst.start.0, dst.end.0);
    }
    println!("Historian:      {}", config.query.base_url);
    println!(
        "Query:          subsets of {}, {}s timeout, {} attempts, {}ms delay, {:?} envelope",
        config.query.subset_size,
        config.query.timeout_secs,
        config.query.attempt_limit,
        config.query.retry_delay_ms,
        config.query.envelope
    );
    println!("Staging dir:    {}", config.output.staging_dir.display());
    println!("Storage:        {}", config.storage.uri);
    println!(
        "Compression:    {} {} (.{})",
        config.compression.program,
        config.compression.args.join(" "),
        config.compression.extension
    );
    Ok(())
}
