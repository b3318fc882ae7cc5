//! Wearable Features CLI
//!
//! Merges wristband session exports and appends per-event physiology
//! features to wake and sleep report tables.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wearable_features::{
    audit::{create_shared_log, RunLog, RunStats},
    config::Config,
    core::{features_path, EventKind, ReportTable},
    pipeline::{run_feature_stage, run_merge_stage},
    VERSION,
};

#[derive(Parser)]
#[command(name = "wearable-features")]
#[command(version = VERSION)]
#[command(about = "Time alignment and feature extraction for wristband recordings", long_about = None)]
struct Cli {
    /// Show debug output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconstruct and merge raw session exports per subject
    Merge {
        /// Only merge these subjects (repeatable)
        #[arg(long = "subject")]
        subjects: Vec<String>,

        /// Study root, overriding the configured one
        #[arg(long)]
        data_root: Option<PathBuf>,
    },

    /// Append features to wake and/or sleep report tables
    Features {
        /// Wake report table
        #[arg(long)]
        wake: Option<PathBuf>,

        /// Sleep report table
        #[arg(long)]
        sleep: Option<PathBuf>,

        /// Directory for the feature tables
        #[arg(long, short)]
        output_dir: Option<PathBuf>,

        /// Study root, overriding the configured one
        #[arg(long)]
        data_root: Option<PathBuf>,
    },

    /// Show statistics of the last run
    Status,

    /// Show configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("Warning: {e}");
    }

    let result = match cli.command {
        Commands::Merge {
            subjects,
            data_root,
        } => cmd_merge(&subjects, data_root),
        Commands::Features {
            wake,
            sleep,
            output_dir,
            data_root,
        } => cmd_features(wake, sleep, output_dir, data_root),
        Commands::Status => {
            cmd_status();
            Ok(())
        }
        Commands::Config { init } => cmd_config(init),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}

fn load_config(data_root: Option<PathBuf>) -> anyhow::Result<Config> {
    let mut config = Config::load().context("loading configuration")?;
    if let Some(root) = data_root {
        config.data_root = root;
    }
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    Ok(config)
}

fn cmd_merge(subjects: &[String], data_root: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(data_root)?;

    println!("Wearable Features v{VERSION}");
    println!();
    println!("Merging sessions under {:?}", config.data_root);
    println!("  Session types: {}", config.session_types.join(", "));
    if !subjects.is_empty() {
        println!("  Subjects: {}", subjects.join(", "));
    }
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let log = create_shared_log(Some(config.run_stats_path()));
    run_merge_stage(&config, subjects, &log, &running)?;

    if let Err(e) = log.save() {
        eprintln!("Warning: Could not save run statistics: {e}");
    }
    println!();
    println!("{}", log.summary());
    Ok(())
}

fn cmd_features(
    wake: Option<PathBuf>,
    sleep: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    data_root: Option<PathBuf>,
) -> anyhow::Result<()> {
    if wake.is_none() && sleep.is_none() {
        anyhow::bail!("at least one of --wake or --sleep is required");
    }

    let config = load_config(data_root)?;
    let output_dir = output_dir.unwrap_or_else(|| config.output_dir.clone());
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    println!("Wearable Features v{VERSION}");
    println!();
    println!("Study root: {:?}", config.data_root);
    println!("Output directory: {output_dir:?}");
    println!("Survey time zone: {}", config.survey_timezone);
    println!();
    println!("Press Ctrl+C to stop after the current subject");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let log = create_shared_log(Some(config.run_stats_path()));
    let jobs = [(wake, EventKind::Wake), (sleep, EventKind::Sleep)];

    for (input, kind) in jobs {
        let Some(input) = input else { continue };
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let output = run_table(&input, kind, &output_dir, &config, &log, &running)?;
        println!("{kind} features written to {output:?}");
    }

    if let Err(e) = log.save() {
        eprintln!("Warning: Could not save run statistics: {e}");
    }
    println!();
    println!("{}", log.summary());
    Ok(())
}

fn run_table(
    input: &Path,
    kind: EventKind,
    output_dir: &Path,
    config: &Config,
    log: &RunLog,
    running: &AtomicBool,
) -> anyhow::Result<PathBuf> {
    let table = ReportTable::read(input)?;
    let output = features_path(input, output_dir);

    let run = run_feature_stage(&table, kind, &output, config, log, running)
        .with_context(|| format!("extracting {kind} features from {}", input.display()))?;
    if run.stopped {
        println!("Stopped early: {} subject(s) done, remaining rows left missing", run.subjects);
    }
    Ok(output)
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("Wearable Features Status");
    println!("========================");
    println!();
    println!("Configuration:");
    println!("  Study root: {:?}", config.data_root);
    println!("  Session types: {}", config.session_types.join(", "));
    println!("  Output directory: {:?}", config.output_dir);
    println!(
        "  Wake window: {} min before to {} min before completion",
        config.window.wake_lead.as_secs() / 60,
        config.window.wake_lag.as_secs() / 60
    );
    println!();

    match RunStats::load(&config.run_stats_path()) {
        Ok(Some(stats)) => println!("{}", stats.summary()),
        Ok(None) => println!("No previous run found."),
        Err(e) => eprintln!("Warning: Could not read run statistics: {e}"),
    }
}

fn cmd_config(init: bool) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    if init {
        config.save().context("saving configuration")?;
        println!("Configuration written to {:?}", Config::config_path());
        return Ok(());
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
