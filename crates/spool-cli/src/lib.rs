//! spool CLI - administration client for the spool tape HSM

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod client;
pub mod commands;

/// Administration client for the spool tape HSM.
#[derive(Debug, Parser)]
#[command(name = "spool", version, about)]
pub struct Cli {
    /// Daemon configuration file (for socket and key locations)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the daemon and wait until it answers
    Start,
    /// Stop the daemon
    Stop {
        /// Interrupt running workers at their next checkpoint
        #[arg(short = 'x', long)]
        forced: bool,
        /// Let all in-progress work finish before stopping
        #[arg(short, long)]
        finish: bool,
    },
    /// Bring a filesystem under management
    Add {
        /// Filesystem to manage
        managed_fs: PathBuf,
        /// Mount point, defaults to the filesystem path
        #[arg(short, long)]
        mount_point: Option<PathBuf>,
        /// Filesystem name
        #[arg(short = 'N', long, default_value = "managed")]
        fs_name: String,
    },
    /// Migrate files to up to three tape pools
    Migrate {
        /// Comma-separated pool list (1-3 pools)
        #[arg(short = 'P', long)]
        pools: String,
        /// Premigrate only: keep the disk copy intact
        #[arg(short, long)]
        premigrate: bool,
        /// Files to migrate
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Recall files from tape
    Recall {
        /// Make files fully resident instead of premigrated
        #[arg(short, long)]
        resident: bool,
        /// Files to recall
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Query server state
    Info {
        #[command(subcommand)]
        what: InfoCommands,
    },
    /// Manage tape pools
    Pool {
        #[command(subcommand)]
        action: PoolCommands,
    },
    /// Format a cartridge
    Format {
        /// Pool the cartridge belongs to
        #[arg(short = 'P', long, default_value = "")]
        pool: String,
        /// Cartridge to format
        #[arg(short, long)]
        tape: String,
    },
    /// Check a cartridge
    Check {
        /// Pool the cartridge belongs to
        #[arg(short = 'P', long, default_value = "")]
        pool: String,
        /// Cartridge to check
        #[arg(short, long)]
        tape: String,
    },
    /// Rescan the tape library
    Retrieve,
}

#[derive(Debug, Subcommand)]
pub enum InfoCommands {
    /// List queued and running requests
    Requests {
        /// Restrict to one request number
        #[arg(short = 'n', long)]
        req_num: Option<i64>,
    },
    /// List queued jobs
    Jobs {
        /// Restrict to one request number
        #[arg(short = 'n', long)]
        req_num: Option<i64>,
    },
    /// List tape drives
    Drives,
    /// List cartridges
    Tapes,
    /// List tape pools
    Pools,
}

#[derive(Debug, Subcommand)]
pub enum PoolCommands {
    /// Create an empty pool
    Create { pool: String },
    /// Delete an empty pool
    Delete { pool: String },
    /// Add cartridges to a pool
    Add {
        pool: String,
        #[arg(required = true)]
        tapes: Vec<String>,
    },
    /// Remove cartridges from a pool
    Remove {
        pool: String,
        #[arg(required = true)]
        tapes: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use clap::Parser;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_migrate() {
        let cli = Cli::parse_from(["spool", "migrate", "-P", "p1,p2", "/m/a", "/m/b"]);
        match cli.command {
            Commands::Migrate {
                pools,
                premigrate,
                files,
            } => {
                assert_eq!(pools, "p1,p2");
                assert!(!premigrate);
                assert_eq!(files.len(), 2);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_forced_stop() {
        let cli = Cli::parse_from(["spool", "stop", "-x"]);
        match cli.command {
            Commands::Stop { forced, finish } => {
                assert!(forced);
                assert!(!finish);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_info_requests_with_filter() {
        let cli = Cli::parse_from(["spool", "info", "requests", "-n", "7"]);
        match cli.command {
            Commands::Info {
                what: InfoCommands::Requests { req_num },
            } => assert_eq!(req_num, Some(7)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_migrate_requires_files() {
        assert!(Cli::try_parse_from(["spool", "migrate", "-P", "p1"]).is_err());
    }
}
