//! # swarm-keeper
//!
//! Runs deterministic verification checks against a Swarm/Bee cluster.
//!
//! ## Commands
//!
//! - `check`: Run the configured checks and report each one
//! - `list`: List available check types
//!
//! ## Example
//!
//! ```bash
//! # Run the run list from a config file
//! swarm-keeper check --config keeper.toml
//!
//! # Re-run one check with the seed from a failed report
//! swarm-keeper check --config keeper.toml --checks pushsync --seed 8412
//!
//! # Try checks against an in-memory cluster of 6 nodes
//! swarm-keeper check --mock 6 --checks smoke,retrieval
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{check, list};

/// Runs deterministic verification checks against a Swarm/Bee cluster.
#[derive(Parser, Debug)]
#[command(name = "swarm-keeper")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run checks and print a report
    Check {
        /// TOML file with cluster, run list and check options
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Checks to run, replacing the configured run list
        #[arg(long, value_delimiter = ',')]
        checks: Vec<String>,

        /// Seed for checks without their own
        #[arg(long)]
        seed: Option<i64>,

        /// Skip remaining checks after the first failure
        #[arg(long)]
        stop_on_failure: bool,

        /// Run checks concurrently
        #[arg(long)]
        concurrent: bool,

        /// Use an in-memory cluster of this many nodes instead of live nodes
        #[arg(long, value_name = "NODES", value_parser = clap::value_parser!(u16).range(1..))]
        mock: Option<u16>,

        /// Write Prometheus metrics of the run to this file
        #[arg(long)]
        metrics_file: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available check types
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check {
            config,
            checks,
            seed,
            stop_on_failure,
            concurrent,
            mock,
            metrics_file,
            json,
        } => {
            check::run(check::CheckArgs {
                config,
                checks,
                seed,
                stop_on_failure,
                concurrent,
                mock: mock.map(usize::from),
                metrics_file,
                json,
            })
            .await?;
        }
        Commands::List => {
            list::run();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_check_flags() {
        let cli = Cli::try_parse_from([
            "swarm-keeper",
            "check",
            "--mock",
            "5",
            "--checks",
            "smoke,pushsync",
            "--seed",
            "12",
            "--stop-on-failure",
        ])
        .unwrap();
        match cli.command {
            Commands::Check {
                checks,
                seed,
                mock,
                stop_on_failure,
                concurrent,
                ..
            } => {
                assert_eq!(checks, vec!["smoke", "pushsync"]);
                assert_eq!(seed, Some(12));
                assert_eq!(mock, Some(5));
                assert!(stop_on_failure);
                assert!(!concurrent);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn empty_mock_cluster_is_rejected() {
        assert!(Cli::try_parse_from(["swarm-keeper", "check", "--mock", "0"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
