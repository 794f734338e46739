//! Harvest main entry point
//!
//! This is the command-line interface for the harvest crawl engine.

use anyhow::Context;
use clap::Parser;
use harvest_engine::config::{load_config_with_hash, Config};
use harvest_engine::crawler::url_list_orchestrator;
use harvest_engine::item::ItemLister;
use harvest_engine::output::{load_status, print_statistics, print_status};
use harvest_engine::sources::UrlListLister;
use harvest_engine::storage::{DedupIndex, StatePaths};
use harvest_engine::RunOutcome;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Harvest: a resumable, rate-adaptive crawl engine
///
/// Harvest downloads every URL of a list under bounded concurrency, backs
/// off when the source throttles it, and checkpoints after every batch so
/// an interrupted run picks up where it stopped.
#[derive(Parser, Debug)]
#[command(name = "harvest")]
#[command(version = "1.0.0")]
#[command(about = "A resumable, rate-adaptive crawl engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Start a fresh run, deleting the checkpoint and dedup index first
    #[arg(long)]
    fresh: bool,

    /// Process items even if an earlier run already resolved them
    #[arg(long)]
    force: bool,

    /// Validate config and show what would be processed without processing
    #[arg(long, conflicts_with_all = ["status", "fresh", "force"])]
    dry_run: bool,

    /// Show the state directory's checkpoint and dedup counts and exit
    #[arg(long, conflicts_with_all = ["dry_run", "fresh", "force"])]
    status: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.force {
        config.engine.force_reprocess = true;
    }

    if cli.dry_run {
        handle_dry_run(&config).await
    } else if cli.status {
        handle_status(&config)
    } else {
        handle_run(config, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("harvest_engine=info,harvest=info,warn"),
            1 => EnvFilter::new("harvest_engine=debug,harvest=debug,info"),
            2 => EnvFilter::new("harvest_engine=trace,harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and counts pending work
async fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Harvest Dry Run ===\n");

    let engine = &config.engine;
    println!("Engine Configuration:");
    println!("  Max concurrency: {}", engine.max_concurrency);
    println!("  Batch size: {}", engine.batch_size);
    println!(
        "  Delay: {}ms base, {}ms max (x{} backoff, x{} recovery after {} successes)",
        engine.base_delay_ms,
        engine.max_delay_ms,
        engine.backoff_factor,
        engine.recovery_factor,
        engine.recovery_after
    );
    println!(
        "  Cooldown: {}ms after more than {} throttles in {}ms",
        engine.cooldown_ms, engine.throttle_threshold, engine.throttle_window_ms
    );
    println!("  Max attempts: {}", engine.max_attempts);
    println!("  Item timeout: {}ms", engine.item_timeout_ms);
    println!("  Malformed items: {:?}", engine.malformed_items);

    println!("\nUser Agent:");
    println!("  Name: {}", config.user_agent.crawler_name);
    println!("  Version: {}", config.user_agent.crawler_version);
    println!("  Contact URL: {}", config.user_agent.contact_url);
    println!("  Contact Email: {}", config.user_agent.contact_email);

    println!("\nOutput:");
    println!("  State: {}", config.output.state_dir);
    println!("  Content: {}", config.output.content_dir);

    let items = UrlListLister::new(&config.source.url_list)
        .list()
        .await
        .with_context(|| format!("failed to list {}", config.source.url_list))?;
    let dedup = DedupIndex::load(&StatePaths::new(Path::new(&config.output.state_dir)).dedup)?;
    let already_done = items.iter().filter(|i| dedup.is_done(i.id())).count();

    println!("\nSource: {}", config.source.url_list);
    println!("  Listed: {}", items.len());
    println!("  Already done: {}", already_done);

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would process {} items",
        if engine.force_reprocess {
            items.len()
        } else {
            items.len() - already_done
        }
    );

    Ok(())
}

/// Handles the --status mode: shows the state directory without changing it
fn handle_status(config: &Config) -> anyhow::Result<()> {
    println!("State directory: {}\n", config.output.state_dir);
    let status = load_status(Path::new(&config.output.state_dir))?;
    print_status(&status);
    Ok(())
}

/// Handles the main run
async fn handle_run(config: Config, fresh: bool) -> anyhow::Result<()> {
    if fresh {
        tracing::info!("Starting fresh run (clearing previous state)");
        StatePaths::new(Path::new(&config.output.state_dir)).clear()?;
    } else {
        tracing::info!("Starting run (will resume if an interrupted run exists)");
    }

    let orchestrator = url_list_orchestrator(&config)?;

    // Ctrl-C stops the run at the next batch boundary
    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; finishing the current batch");
            token.cancel();
        }
    });

    match orchestrator.run().await {
        Ok(summary) => {
            print_statistics(&summary.stats);
            match summary.outcome {
                RunOutcome::Completed => tracing::info!("Run completed successfully"),
                RunOutcome::Cancelled => {
                    tracing::info!("Run cancelled; rerun the same command to resume")
                }
            }
            Ok(())
        }
        Err(failure) => {
            print_statistics(&failure.partial);
            Err(failure.into())
        }
    }
}
