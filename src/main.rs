//! Asset GC
//!
//! Reclaims file and image assets no deployed stack references any more.
//! The binary runs against an environment snapshot file: it loads the
//! snapshot, runs one collection, and writes the resulting state back.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use collector::{
    CollectorConfig, FileRunLock, GarbageCollector, InMemoryEnvironment, NoopRunLock,
    ReclaimReport, RunLock,
};
use common::StoreKind;
use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "asset-gc",
    author,
    version,
    about = "Garbage-collect unreferenced deployment assets",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one garbage collection against an environment snapshot
    Run(RunArgs),

    #[command(flatten)]
    Common(CommonCommands),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[arg(long, short = 'e', help = "Environment snapshot file (JSON)")]
    environment_file: PathBuf,

    #[arg(long = "type", value_enum, help = "Stores to collect")]
    store_kind: Option<StoreKind>,

    #[arg(long, help = "Report what would happen without tagging or deleting")]
    dry_run: bool,

    #[arg(
        long,
        value_name = "DAYS",
        help = "Days an asset stays tombstoned before deletion"
    )]
    in_isolation_for: Option<u32>,

    #[arg(long, help = "Asset bucket name")]
    bucket: Option<String>,

    #[arg(long, help = "Print the reclaim report as JSON")]
    json: bool,
}

impl RunArgs {
    /// Apply CLI overrides on top of the loaded configuration.
    fn apply(&self, config: &mut Configuration) {
        if let Some(store_kind) = self.store_kind {
            config.collector.store_kind = store_kind;
        }
        if self.dry_run {
            config.collector.dry_run = true;
        }
        if let Some(days) = self.in_isolation_for {
            config.collector.in_isolation_for_days = days;
        }
        if let Some(bucket) = &self.bucket {
            config.environment.bucket = Some(bucket.clone());
        }
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => tracing::info!("Received SIGINT"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        tracing::info!("Received Ctrl+C");
    }

    Ok(())
}

fn run_lock(config: &Configuration) -> Arc<dyn RunLock> {
    match &config.collector.lock_file {
        Some(path) => Arc::new(FileRunLock::new(path)),
        None => Arc::new(NoopRunLock),
    }
}

fn print_summary(report: &ReclaimReport) {
    let mode = if report.dry_run { " (dry run)" } else { "" };
    println!("Garbage collection {}{mode}", report.run_id);
    println!("  Environment: {}", report.scope);
    println!("  Stacks: {}", report.stacks);
    println!(
        "  Grace period: {} days, elapsed {}",
        report.in_isolation_for_days,
        humantime::format_duration(report.elapsed)
    );

    for store in &report.stores {
        if let Some(error) = &store.error {
            println!("  {}: FAILED ({error})", store.target);
            continue;
        }
        println!(
            "  {}: scanned {}, live {}, isolated {}, tombstoned {}, pending {}, deleted {}, failures {}",
            store.target,
            store.scanned,
            store.live,
            store.isolated.len(),
            store.tombstoned.len(),
            store.pending.len(),
            store.deleted.len(),
            store.failures.len(),
        );
        if report.dry_run {
            for artifact in &store.isolated {
                println!("    isolated: {artifact}");
            }
        }
        for failure in &store.failures {
            println!("    failed: {} ({})", failure.artifact, failure.error);
        }
    }
}

async fn run(mut config: Configuration, args: RunArgs) -> Result<()> {
    args.apply(&mut config);

    let collector_config = CollectorConfig::from(&config);
    collector_config
        .validate()
        .context("Invalid collector configuration")?;
    let dry_run = collector_config.dry_run;

    let env = InMemoryEnvironment::load(&args.environment_file).await?;
    let collector = GarbageCollector::in_memory(&env, collector_config).with_lock(run_lock(&config));

    let outcome = tokio::select! {
        result = collector.run() => Some(result),
        signal = wait_for_shutdown_signal() => {
            signal?;
            None
        }
    };

    // Tags and deletes already issued are real even when the run was cut
    // short, so the snapshot is written back either way.
    if !dry_run {
        env.save(&args.environment_file).await?;
    }

    let Some(result) = outcome else {
        bail!("Garbage collection aborted by shutdown signal");
    };
    let report = result.context("Garbage collection failed")?;

    if args.json {
        let json =
            serde_json::to_string_pretty(&report).context("Failed to serialize reclaim report")?;
        println!("{json}");
    } else {
        print_summary(&report);
    }

    collector.metrics().log_summary();

    if report.has_failures() {
        bail!(
            "Garbage collection finished with {} failure(s)",
            report.failure_count()
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Common(CommonCommands::Config { json }) => utils::display_config(&config, json),
        Command::Common(CommonCommands::Validate) => {
            CollectorConfig::from(&config)
                .validate()
                .context("Configuration is invalid")?;
            println!("Configuration is valid");
            Ok(())
        }
        Command::Common(CommonCommands::Version) => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
