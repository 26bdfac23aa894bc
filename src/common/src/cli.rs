use clap::{Args, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared across all binaries
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Subcommands that inspect configuration without touching any store
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Default log level implied by the CLI flags.
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments. `RUST_LOG` takes precedence.
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            let env = &config.environment;
            let collector = &config.collector;
            println!("Asset GC Configuration:");
            println!("=======================");
            println!("Environment: {}", env.scope());
            println!("Bucket: {}", env.bucket.as_deref().unwrap_or("(none)"));
            println!("Store kind: {}", collector.store_kind);
            println!("Dry run: {}", collector.dry_run);
            println!("In isolation for: {} days", collector.in_isolation_for_days);
            println!(
                "Managed repository tag: {}={}",
                collector.managed_repository_tag_key, collector.managed_repository_tag_value
            );
            println!("Repository concurrency: {}", collector.repository_concurrency);
            println!("Delete batch size: {}", collector.delete_batch_size);
            match &collector.lock_file {
                Some(path) => println!("Lock file: {}", path.display()),
                None => println!("Lock file: disabled"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_from_flags() {
        let args = CommonArgs {
            config: None,
            verbose: true,
            quiet: false,
        };
        assert_eq!(utils::log_level(&args), "debug");

        let args = CommonArgs {
            quiet: true,
            ..args
        };
        assert_eq!(utils::log_level(&args), "warn");
    }
}
