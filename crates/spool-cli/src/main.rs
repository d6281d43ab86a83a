//! spool - administration client for the spool tape HSM

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spool_cli::{commands, Cli, Commands};
use spool_config::DaemonConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DaemonConfig::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Start => commands::start::execute(cli.config.as_deref(), &config),
        Commands::Stop { forced, finish } => {
            commands::stop::execute(&config, *forced, *finish)
        }
        Commands::Add {
            managed_fs,
            mount_point,
            fs_name,
        } => commands::add::execute(&config, managed_fs, mount_point.as_deref(), fs_name),
        Commands::Migrate {
            pools,
            premigrate,
            files,
        } => commands::migrate::execute(&config, pools, *premigrate, files),
        Commands::Recall { resident, files } => {
            commands::recall::execute(&config, *resident, files)
        }
        Commands::Info { what } => commands::info::execute(&config, what),
        Commands::Pool { action } => commands::pool::execute(&config, action),
        Commands::Format { pool, tape } => {
            commands::maintenance::execute(&config, false, pool, tape)
        }
        Commands::Check { pool, tape } => {
            commands::maintenance::execute(&config, true, pool, tape)
        }
        Commands::Retrieve => commands::retrieve::execute(&config),
    }
}
