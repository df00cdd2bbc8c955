//! Command-line surface.
//!
//! Commands:
//! - `legal-events scrape` - fetch sources and reconcile them into the store
//! - `legal-events cleanup` - run the retention sweeps
//! - `legal-events stats` - counts per status and pending cleanup work
//! - `legal-events sources` - list configured sources
//! - `legal-events init-config` - write the default configuration file

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::StoreKind;

#[derive(Parser, Debug)]
#[command(name = "legal-events")]
#[command(author, version, about = "Collects legal-industry events into one store")]
pub struct Cli {
    /// Config file (defaults to the platform data directory)
    #[arg(long, global = true, env = "LEGAL_EVENTS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the configured store backend
    #[arg(long, global = true, value_enum)]
    pub store: Option<StoreArg>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreArg {
    Sqlite,
    Json,
}

impl From<StoreArg> for StoreKind {
    fn from(arg: StoreArg) -> Self {
        match arg {
            StoreArg::Sqlite => StoreKind::Sqlite,
            StoreArg::Json => StoreKind::Json,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scrape sources and reconcile the results
    Scrape {
        /// Limit the run to these sources (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,
        /// Write the run summary here instead of stdout
        #[arg(long)]
        summary: Option<PathBuf>,
        /// Fetch and normalize only; leave the store untouched
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete past and cancelled events, archive old denied ones
    Cleanup {
        /// Report what would change without changing it
        #[arg(long)]
        dry_run: bool,
    },

    /// Show store statistics
    Stats,

    /// List configured sources
    Sources,

    /// Write the default configuration
    InitConfig {
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scrape_flags() {
        let cli = Cli::try_parse_from([
            "legal-events",
            "--store",
            "json",
            "scrape",
            "--source",
            "chips",
            "--source",
            "lsuite",
            "--summary",
            "out.json",
        ])
        .expect("parse");
        assert_eq!(cli.store, Some(StoreArg::Json));
        match cli.command {
            Commands::Scrape { sources, summary, dry_run } => {
                assert_eq!(sources, vec!["chips", "lsuite"]);
                assert_eq!(summary, Some(PathBuf::from("out.json")));
                assert!(!dry_run);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["legal-events", "cleanup", "--dry-run", "--config", "c.json"])
            .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("c.json")));
        assert!(matches!(cli.command, Commands::Cleanup { dry_run: true }));
    }

    #[test]
    fn rejects_unknown_store() {
        assert!(Cli::try_parse_from(["legal-events", "--store", "postgres", "stats"]).is_err());
    }
}
