//! The per-host automated update state machine, grounded on `update_automator.py`'s
//! `UpdateAutomator.process_host_automated_update`: connect, detect OS, refresh cache (3
//! retries), check updates, gate on opt-out/no-updates, snapshot, apply updates, optionally
//! reboot and verify, reverting the snapshot on any failure past that point.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use fleetpatch_api::model::{Host, Outcome, UpdateResult, VmMapping};
use hypervisor::client::HypervisorApi;
use log::{info, warn};

use crate::config::{SshConfig, UpdatesConfig};
use crate::prober::{HostProber, SshProber};
use crate::remote::{Shell, ShellConnector, SshConnector};
use crate::{osprobe, packages};

const REFRESH_CACHE_RETRIES: u32 = 3;
const REFRESH_CACHE_RETRY_DELAY: Duration = Duration::from_secs(5);
const REBOOT_SETTLE_DELAY: Duration = Duration::from_secs(10);
const SNAPSHOT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Drives the full check/update/reboot/revert workflow for one host at a time. Cheap to
/// construct; holds only borrowed configuration and an optional shared hypervisor client.
/// `shell_connector`, `hypervisor` and `prober` are trait objects so tests can substitute fakes
/// for the SSH/hypervisor/availability dependencies without a network or a real VM.
pub struct Orchestrator<'a> {
    updates_config: &'a UpdatesConfig,
    shell_connector: Box<dyn ShellConnector + 'a>,
    hypervisor: Option<&'a dyn HypervisorApi>,
    vm_mappings: &'a HashMap<String, VmMapping>,
    prober: Box<dyn HostProber + 'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        ssh_config: &'a SshConfig,
        updates_config: &'a UpdatesConfig,
        hypervisor: Option<&'a dyn HypervisorApi>,
        vm_mappings: &'a HashMap<String, VmMapping>,
    ) -> Self {
        Orchestrator {
            updates_config,
            shell_connector: Box::new(SshConnector { ssh_config }),
            hypervisor,
            vm_mappings,
            prober: Box::new(SshProber { ssh_config }),
        }
    }

    /// Test-facing constructor: accepts pre-built collaborators so the state machine can be
    /// driven against fakes instead of a live SSH session, hypervisor API and clock.
    pub fn with_collaborators(
        updates_config: &'a UpdatesConfig,
        shell_connector: Box<dyn ShellConnector + 'a>,
        hypervisor: Option<&'a dyn HypervisorApi>,
        vm_mappings: &'a HashMap<String, VmMapping>,
        prober: Box<dyn HostProber + 'a>,
    ) -> Self {
        Orchestrator {
            updates_config,
            shell_connector,
            hypervisor,
            vm_mappings,
            prober,
        }
    }

    /// Runs a check-only pass: connect, detect OS, refresh cache once, list updates. Never
    /// applies anything, matching `main.py`'s `process_host`.
    pub fn check_host(&self, host: &Host, timeout: Duration) -> UpdateResult {
        let start_time = Utc::now();

        let shell = match self.shell_connector.connect(host, timeout) {
            Ok(shell) => shell,
            Err(e) => return self.failure(host, None, Outcome::FailedAvailability, start_time, e.to_string()),
        };

        let os_info = match osprobe::detect(shell.as_ref()) {
            Ok(info) => info,
            Err(e) => return self.failure(host, None, Outcome::FailedUpdates, start_time, e.to_string()),
        };

        let Some(manager) = packages::for_kind(os_info.package_manager) else {
            return self.failure(
                host,
                Some(os_info),
                Outcome::FailedUpdates,
                start_time,
                format!("Unsupported package manager: {:?}", os_info.package_manager),
            );
        };

        if let Err(e) = manager.refresh_cache(shell.as_ref()) {
            warn!("Failed to refresh package cache on {}: {e}", host.name);
        }

        let updates = match manager.check_updates(shell.as_ref()) {
            Ok(updates) => updates,
            Err(e) => return self.failure(host, Some(os_info), Outcome::FailedUpdates, start_time, e.to_string()),
        };

        let outcome = if updates.is_empty() { Outcome::NoUpdates } else { Outcome::Success };
        UpdateResult {
            host: host.name.clone(),
            outcome,
            os_info: Some(os_info),
            updates,
            detail: None,
            vm_node: None,
            vm_id: None,
            snapshot_name: None,
            start_time,
            end_time: Utc::now(),
        }
    }

    /// Runs the full automated workflow for one host.
    pub fn process_host(&self, host: &Host, timeout: Duration) -> UpdateResult {
        let start_time = Utc::now();
        let vm_mapping = self.vm_mappings.get(&host.name);
        if vm_mapping.is_none() && self.hypervisor.is_some() {
            warn!("No VM mapping found for {} - snapshots disabled", host.name);
        }

        info!("Starting automated update process for {}", host.name);

        let shell = match self.shell_connector.connect(host, timeout) {
            Ok(shell) => shell,
            Err(_) => {
                return self.failure(
                    host,
                    None,
                    Outcome::FailedUpdates,
                    start_time,
                    "SSH connection failed".to_string(),
                )
            }
        };

        let os_info = match osprobe::detect(shell.as_ref()) {
            Ok(info) => info,
            Err(_) => {
                return self.failure(host, None, Outcome::FailedUpdates, start_time, "OS detection failed".to_string())
            }
        };

        let Some(manager) = packages::for_kind(os_info.package_manager) else {
            let detail = format!("Unsupported package manager: {:?}", os_info.package_manager);
            return self.failure(host, Some(os_info), Outcome::FailedUpdates, start_time, detail);
        };

        info!("Checking for updates on {}", host.name);
        if !self.refresh_cache_with_retries(shell.as_ref(), manager.as_ref(), host) {
            let detail = format!(
                "Failed to refresh package cache on {} after {REFRESH_CACHE_RETRIES} attempts",
                host.name
            );
            return self.failure(host, Some(os_info), Outcome::FailedUpdates, start_time, detail);
        }

        let updates = match manager.check_updates(shell.as_ref()) {
            Ok(updates) => updates,
            Err(e) => return self.failure(host, Some(os_info), Outcome::FailedUpdates, start_time, e.to_string()),
        };

        let opt_out = self.updates_config.opt_out_hosts.iter().any(|h| h == &host.name);
        if opt_out || !self.updates_config.apply_updates {
            if opt_out {
                info!("Host {} is in opt-out list - only checking updates", host.name);
            } else {
                info!("Update application disabled - only checking updates on {}", host.name);
            }
            return self.result(host, Some(os_info), updates, Outcome::OptOut, vm_mapping, None, start_time, None);
        }

        if updates.is_empty() {
            info!("No updates available for {}", host.name);
            return self.result(host, Some(os_info), updates, Outcome::NoUpdates, vm_mapping, None, start_time, None);
        }

        let security_count = updates.iter().filter(|u| u.is_security).count();
        info!("Found {} updates for {} ({security_count} security)", updates.len(), host.name);

        let mut snapshot_name = None;
        if let (Some(client), Some(mapping)) = (self.hypervisor, vm_mapping) {
            match self.create_snapshot(client, mapping, start_time) {
                Some(name) => snapshot_name = Some(name),
                None => {
                    return self.result(
                        host,
                        Some(os_info),
                        updates,
                        Outcome::FailedSnapshot,
                        vm_mapping,
                        None,
                        start_time,
                        Some("Failed to create VM snapshot".to_string()),
                    )
                }
            }
        }

        info!("Applying {} updates on {}", updates.len(), host.name);
        if let Err(e) = manager.apply_updates(shell.as_ref()) {
            let detail = format!("Failed to apply package updates: {e}");
            let (outcome, detail) = self.revert_or(detail, vm_mapping, snapshot_name.as_deref(), Outcome::FailedUpdates);
            return self.result(host, Some(os_info), updates, outcome, vm_mapping, snapshot_name, start_time, Some(detail));
        }

        info!("Successfully applied updates on {}", host.name);

        if self.updates_config.reboot_after_updates {
            info!("Reboot after updates is enabled - proceeding with reboot for {}", host.name);
            if let Some(result) = self.handle_reboot_and_verification(
                host,
                vm_mapping,
                snapshot_name.as_deref(),
                &os_info,
                &updates,
                start_time,
            ) {
                return result;
            }
        } else {
            info!("Reboot after updates is disabled - skipping reboot for {}", host.name);
        }

        if let (Some(client), Some(mapping), Some(_)) = (self.hypervisor, vm_mapping, snapshot_name.as_ref()) {
            if self.updates_config.cleanup_snapshots {
                self.cleanup_old_snapshots(client, mapping);
            }
        }

        self.result(host, Some(os_info), updates, Outcome::Success, vm_mapping, snapshot_name, start_time, None)
    }

    fn refresh_cache_with_retries(
        &self,
        shell: &dyn Shell,
        manager: &dyn packages::PackageManager,
        host: &Host,
    ) -> bool {
        for attempt in 1..=REFRESH_CACHE_RETRIES {
            if manager.refresh_cache(shell).is_ok() {
                return true;
            }
            warn!(
                "Failed to refresh package cache on {} (attempt {attempt}/{REFRESH_CACHE_RETRIES})",
                host.name
            );
            if attempt < REFRESH_CACHE_RETRIES {
                std::thread::sleep(REFRESH_CACHE_RETRY_DELAY);
            }
        }
        false
    }

    fn create_snapshot(
        &self,
        client: &dyn HypervisorApi,
        mapping: &VmMapping,
        start_time: chrono::DateTime<Utc>,
    ) -> Option<String> {
        let name = format!(
            "{}-{}",
            self.updates_config.snapshot_name_prefix,
            start_time.format("%Y%m%d-%H%M%S")
        );
        let description = format!("Pre-update snapshot created by fleetpatch at {start_time}");

        let upid = client.create_snapshot(&mapping.node, mapping.vmid, &name, &description, false).ok()?;
        match client.wait_for_task(&mapping.node, &upid, SNAPSHOT_WAIT_TIMEOUT) {
            Ok(()) => {
                info!("Snapshot {name} created successfully for VM {}", mapping.vmid);
                Some(name)
            }
            Err(e) => {
                warn!("Snapshot creation task failed for VM {}: {e}", mapping.vmid);
                None
            }
        }
    }

    fn revert_snapshot(&self, client: &dyn HypervisorApi, mapping: &VmMapping, snapshot_name: &str) -> bool {
        warn!("Reverting VM {} to snapshot {snapshot_name}", mapping.vmid);
        let Ok(upid) = client.rollback_snapshot(&mapping.node, mapping.vmid, snapshot_name) else {
            return false;
        };
        match client.wait_for_task(&mapping.node, &upid, SNAPSHOT_WAIT_TIMEOUT) {
            Ok(()) => {
                warn!("VM {} reverted to snapshot {snapshot_name}", mapping.vmid);
                true
            }
            Err(e) => {
                warn!("Snapshot rollback task failed for VM {}: {e}", mapping.vmid);
                false
            }
        }
    }

    /// Reverts to `snapshot_name` if one exists, turning a failure into `Reverted` or the more
    /// severe `RevertFailed`; falls back to `fallback` if there's nothing to revert to.
    fn revert_or(
        &self,
        base_detail: String,
        vm_mapping: Option<&VmMapping>,
        snapshot_name: Option<&str>,
        fallback: Outcome,
    ) -> (Outcome, String) {
        if let (Some(client), Some(mapping), Some(snapshot_name)) = (self.hypervisor, vm_mapping, snapshot_name) {
            if self.revert_snapshot(client, mapping, snapshot_name) {
                return (Outcome::Reverted, format!("{base_detail} - reverted to snapshot"));
            }
            return (
                Outcome::RevertFailed,
                format!("{base_detail} - CRITICAL: snapshot revert also failed"),
            );
        }
        (fallback, base_detail)
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_reboot_and_verification(
        &self,
        host: &Host,
        vm_mapping: Option<&VmMapping>,
        snapshot_name: Option<&str>,
        os_info: &fleetpatch_api::model::OsInfo,
        updates: &[fleetpatch_api::model::PackageUpdate],
        start_time: chrono::DateTime<Utc>,
    ) -> Option<UpdateResult> {
        let ping_timeout = Duration::from_secs(self.updates_config.ping_timeout);
        let ping_interval = Duration::from_secs(self.updates_config.ping_interval);
        let reboot_timeout = Duration::from_secs(self.updates_config.reboot_timeout);

        info!("Rebooting {}", host.name);
        let reboot_sent: Result<(), String> = match (self.hypervisor, vm_mapping) {
            (Some(client), Some(mapping)) => {
                client.reboot_vm(&mapping.node, mapping.vmid, reboot_timeout).map_err(|e| e.to_string())
            }
            _ => self.prober.reboot(host, Duration::from_secs(30)).map_err(|e| e.to_string()),
        };
        if let Err(e) = reboot_sent {
            let detail = format!("Failed to send reboot command: {e}");
            let (outcome, detail) = self.revert_or(detail, vm_mapping, snapshot_name, Outcome::FailedReboot);
            return Some(self.result(
                host,
                Some(os_info.clone()),
                updates.to_vec(),
                outcome,
                vm_mapping,
                snapshot_name.map(str::to_string),
                start_time,
                Some(detail),
            ));
        }

        info!("Waiting for {} to reboot...", host.name);
        std::thread::sleep(REBOOT_SETTLE_DELAY);

        if !self.prober.wait_for_availability(host, ping_timeout, ping_interval, true) {
            let detail = format!(
                "Host did not become available within {}s after reboot",
                ping_timeout.as_secs()
            );
            let (outcome, detail) = self.revert_or(detail, vm_mapping, snapshot_name, Outcome::FailedAvailability);
            return Some(self.result(
                host,
                Some(os_info.clone()),
                updates.to_vec(),
                outcome,
                vm_mapping,
                snapshot_name.map(str::to_string),
                start_time,
                Some(detail),
            ));
        }

        info!("Host {} is back online after reboot", host.name);
        None
    }

    fn cleanup_old_snapshots(&self, client: &dyn HypervisorApi, mapping: &VmMapping) {
        let retention = chrono::Duration::days(self.updates_config.snapshot_retention_days as i64);
        let prefix = &self.updates_config.snapshot_name_prefix;
        let cutoff = Utc::now() - retention;

        let snapshots = match client.list_snapshots(&mapping.node, mapping.vmid) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!("Failed to cleanup old snapshots for VM {}: {e}", mapping.vmid);
                return;
            }
        };

        for snapshot in snapshots {
            if !snapshot.name.starts_with(prefix.as_str()) {
                continue;
            }
            let Some(timestamp_str) = snapshot.name.get(prefix.len() + 1..) else {
                continue;
            };
            let Ok(snap_time) = chrono::NaiveDateTime::parse_from_str(timestamp_str, "%Y%m%d-%H%M%S") else {
                continue;
            };
            if snap_time.and_utc() < cutoff {
                info!("Deleting old snapshot {} for VM {}", snapshot.name, mapping.vmid);
                if let Err(e) = client.delete_snapshot(&mapping.node, mapping.vmid, &snapshot.name) {
                    warn!("Failed to delete snapshot {}: {e}", snapshot.name);
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn result(
        &self,
        host: &Host,
        os_info: Option<fleetpatch_api::model::OsInfo>,
        updates: Vec<fleetpatch_api::model::PackageUpdate>,
        outcome: Outcome,
        vm_mapping: Option<&VmMapping>,
        snapshot_name: Option<String>,
        start_time: chrono::DateTime<Utc>,
        detail: Option<String>,
    ) -> UpdateResult {
        UpdateResult {
            host: host.name.clone(),
            outcome,
            os_info,
            updates,
            detail,
            vm_node: vm_mapping.map(|m| m.node.clone()),
            vm_id: vm_mapping.map(|m| m.vmid),
            snapshot_name,
            start_time,
            end_time: Utc::now(),
        }
    }

    fn failure(
        &self,
        host: &Host,
        os_info: Option<fleetpatch_api::model::OsInfo>,
        outcome: Outcome,
        start_time: chrono::DateTime<Utc>,
        detail: String,
    ) -> UpdateResult {
        UpdateResult {
            host: host.name.clone(),
            outcome,
            os_info,
            updates: Vec::new(),
            detail: Some(detail),
            vm_node: None,
            vm_id: None,
            snapshot_name: None,
            start_time,
            end_time: Utc::now(),
        }
    }
}
