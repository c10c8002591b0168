pub mod config;
pub mod dispatcher;
pub mod inventory;
pub mod logging;
pub mod orchestrator;
pub mod osprobe;
pub mod packages;
pub mod prober;
pub mod remote;
pub mod report;
pub mod vm_mapping;

pub mod cli;

/// The version string reported by `--version` and used in SMTP/report headers.
pub const FLEETPATCH_VERSION: &str = env!("CARGO_PKG_VERSION");
