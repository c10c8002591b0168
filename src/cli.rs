use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::FLEETPATCH_VERSION;

#[derive(Parser, Debug)]
#[clap(version = FLEETPATCH_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    /// Path to the fleetpatch configuration file
    #[arg(global = true, short, long, default_value = "config.toml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check all hosts for available updates and send a report. Never mutates a host.
    Check {
        /// Number of hosts to process concurrently
        #[clap(short, long, default_value_t = 5)]
        parallel: usize,

        /// SSH timeout in seconds for the whole host pass
        #[clap(short, long, default_value_t = 120)]
        timeout: u64,

        /// Print the report instead of emailing it
        #[clap(long)]
        dry_run: bool,
    },

    /// Run the full automated update workflow: snapshot, update, reboot, verify, rollback.
    Run {
        /// Number of hosts to process concurrently
        #[clap(short, long, default_value_t = 5)]
        parallel: usize,

        /// SSH timeout in seconds for the whole host pass
        #[clap(short, long, default_value_t = 120)]
        timeout: u64,

        /// Print the report instead of emailing it
        #[clap(long)]
        dry_run: bool,
    },

    /// Write example configuration and inventory files to the current directory
    Init {
        #[clap(long, default_value = "config.toml.example")]
        config_file: PathBuf,

        #[clap(long, default_value = "inventory.yml.example")]
        inventory_file: PathBuf,
    },

    /// Validate configuration and inventory without contacting any host
    #[clap(name = "test-config")]
    TestConfig,
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Check { .. } => "check",
            Commands::Run { .. } => "run",
            Commands::Init { .. } => "init",
            Commands::TestConfig => "test-config",
        }
    }
}
