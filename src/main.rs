use std::collections::HashMap;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use fleetpatch::cli::{Cli, Commands};
use fleetpatch::orchestrator::Orchestrator;
use fleetpatch::{config, dispatcher, inventory, logging, report, vm_mapping};
use fleetpatch_api::error::{ConfigError, FleetPatchError, FleetPatchResultExt, ReportError};
use fleetpatch_api::model::{Host, VmMapping};
use hypervisor::client::HypervisorClient;
use log::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbosity);

    let result = match &cli.command {
        Commands::Check { parallel, timeout, dry_run } => run_check(&cli.config, *parallel, *timeout, *dry_run),
        Commands::Run { parallel, timeout, dry_run } => run_automated(&cli.config, *parallel, *timeout, *dry_run),
        Commands::Init { config_file, inventory_file } => run_init(config_file, inventory_file),
        Commands::TestConfig => run_test_config(&cli.config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:?}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(explicit: &Path) -> Result<config::Config, FleetPatchError> {
    let config_path = config::find_config_path(Some(explicit));
    let config = config::Config::load(&config_path).message(format!("loading configuration from {}", config_path.display()))?;
    info!("Loaded configuration from {}", config_path.display());
    Ok(config)
}

fn load_hosts(config: &config::Config) -> Result<Vec<Host>, FleetPatchError> {
    let inventory_path = config.inventory_path();
    let hosts = inventory::parse(&inventory_path)?;
    info!("Loaded {} hosts from inventory", hosts.len());
    if hosts.is_empty() {
        return Err(FleetPatchError::new(ConfigError::EmptyInventory {
            path: inventory_path.display().to_string(),
        }));
    }
    Ok(hosts)
}

fn load_vm_mappings(config: &config::Config) -> Result<HashMap<String, VmMapping>, FleetPatchError> {
    let Some(proxmox) = &config.proxmox else {
        return Ok(HashMap::new());
    };
    match vm_mapping::find_mapping_path(proxmox.vm_mapping_file.as_deref()) {
        Some(path) => vm_mapping::load(&path),
        None => {
            info!("No VM mapping file found - snapshots disabled fleet-wide");
            Ok(HashMap::new())
        }
    }
}

fn run_check(config_path: &Path, parallel: usize, timeout: u64, dry_run: bool) -> Result<(), FleetPatchError> {
    let config = load_config(config_path)?;
    let hosts = load_hosts(&config)?;

    let vm_mappings = HashMap::new();
    let orchestrator = Orchestrator::new(&config.ssh, &config.updates, None, &vm_mappings);
    let timeout = Duration::from_secs(timeout);

    let fleet_report = dispatcher::dispatch(&hosts, parallel, timeout, |host, timeout| orchestrator.check_host(host, timeout))?;

    let total = fleet_report.results.len();
    let with_updates = fleet_report.results.iter().filter(|r| !r.updates.is_empty()).count();
    let with_security = fleet_report.results.iter().filter(|r| r.security_updates().next().is_some()).count();
    info!("SUMMARY: {total} hosts checked, {with_updates} with updates, {with_security} with security updates");

    report::deliver(&config.email, &fleet_report, dry_run)
}

fn run_automated(config_path: &Path, parallel: usize, timeout: u64, dry_run: bool) -> Result<(), FleetPatchError> {
    let config = load_config(config_path)?;
    let hosts = load_hosts(&config)?;
    let vm_mappings = load_vm_mappings(&config)?;

    for host in &hosts {
        if !vm_mappings.contains_key(&host.name) && !config.updates.opt_out_hosts.contains(&host.name) {
            info!("Host {} has no VM mapping and is not opted out - will only be checked", host.name);
        }
    }

    let hypervisor_client = config
        .proxmox
        .as_ref()
        .map(|p| HypervisorClient::new(&p.endpoint, &p.username, &p.password, p.verify_ssl))
        .transpose()
        .structured(fleetpatch_api::error::HypervisorError::Authenticate {
            endpoint: config.proxmox.as_ref().map(|p| p.endpoint.clone()).unwrap_or_default(),
        })?;

    let hypervisor_api = hypervisor_client.as_ref().map(|c| c as &dyn hypervisor::client::HypervisorApi);
    let orchestrator = Orchestrator::new(&config.ssh, &config.updates, hypervisor_api, &vm_mappings);
    let timeout = Duration::from_secs(timeout);

    let fleet_report = dispatcher::dispatch(&hosts, parallel, timeout, |host, timeout| orchestrator.process_host(host, timeout))?;

    report::deliver(&config.email, &fleet_report, dry_run)
}

fn run_init(config_file: &Path, inventory_file: &Path) -> Result<(), FleetPatchError> {
    const EXAMPLE_CONFIG: &str = include_str!("../config.toml.example");
    const EXAMPLE_INVENTORY: &str = include_str!("../inventory.yml.example");

    std::fs::write(config_file, EXAMPLE_CONFIG).structured(ConfigError::WriteExample {
        path: config_file.display().to_string(),
    })?;
    std::fs::write(inventory_file, EXAMPLE_INVENTORY).structured(ConfigError::WriteExample {
        path: inventory_file.display().to_string(),
    })?;

    info!("Wrote {} and {}", config_file.display(), inventory_file.display());
    info!("Next steps:");
    info!("1. Edit {} with your SMTP/SSH/Proxmox settings", config_file.display());
    info!("2. Edit {} with your host inventory", inventory_file.display());
    info!("3. Run 'fleetpatch check --dry-run' to test");
    Ok(())
}

fn run_test_config(config_path: &Path) -> Result<(), FleetPatchError> {
    let config = load_config(config_path)?;
    let hosts = inventory::parse(&config.inventory_path())?;
    info!("Inventory parsed successfully: {} hosts", hosts.len());

    match &config.proxmox {
        Some(_) => {
            let mappings = load_vm_mappings(&config)?;
            info!("VM mapping parsed successfully: {} entries", mappings.len());
        }
        None => info!("No Proxmox section configured - automated snapshots disabled"),
    }

    Ok(())
}
