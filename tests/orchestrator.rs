//! Drives `Orchestrator::process_host`/`check_host` against fakes for every outcome in
//! `Outcome`'s severity ordering, the way `dispatcher.rs`'s own tests inject a fake `process`
//! closure instead of dispatching real hosts.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use fleetpatch::config::UpdatesConfig;
use fleetpatch::orchestrator::Orchestrator;
use fleetpatch::prober::HostProber;
use fleetpatch::remote::{CommandOutput, Shell, ShellConnector};
use fleetpatch_api::error::{ConnectError, FleetPatchError};
use fleetpatch_api::model::{Host, Outcome, VmMapping};
use hypervisor::client::{HypervisorApi, SnapshotInfo};
use hypervisor::error::HypervisorError;

fn host(name: &str) -> Host {
    Host {
        name: name.to_string(),
        address: format!("{name}.example.com"),
        port: 22,
        username: None,
        vars: BTreeMap::new(),
    }
}

fn vm_mapping(host_name: &str) -> HashMap<String, VmMapping> {
    let mut mappings = HashMap::new();
    mappings.insert(
        host_name.to_string(),
        VmMapping {
            host: host_name.to_string(),
            node: "pve1".to_string(),
            vmid: 101,
            max_snapshots: None,
            endpoint: None,
            username: None,
            password: None,
        },
    );
    mappings
}

fn updates_config() -> UpdatesConfig {
    UpdatesConfig {
        apply_updates: true,
        reboot_after_updates: false,
        reboot_timeout: 300,
        ping_timeout: 60,
        ping_interval: 1,
        snapshot_name_prefix: "fleetpatch".to_string(),
        cleanup_snapshots: false,
        snapshot_retention_days: 30,
        opt_out_hosts: Vec::new(),
    }
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn failed(stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: 1,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// A `Shell` that answers scripted commands by exact match; anything unscripted fails, so a
/// scenario only needs to list the commands its outcome actually depends on.
struct FakeShell {
    host_name: String,
    responses: HashMap<String, CommandOutput>,
}

impl FakeShell {
    /// Base responses that make `osprobe::detect` resolve to Ubuntu/APT.
    fn ubuntu(host_name: &str) -> Self {
        let mut responses = HashMap::new();
        responses.insert("uname -a".to_string(), ok("Linux host1 5.15.0-generic x86_64 GNU/Linux"));
        responses.insert(
            "cat /etc/os-release 2>/dev/null || true".to_string(),
            ok("ID=ubuntu\nVERSION_ID=22.04"),
        );
        responses.insert("test -x /usr/bin/apt".to_string(), ok(""));
        FakeShell {
            host_name: host_name.to_string(),
            responses,
        }
    }

    fn with(mut self, command: &str, output: CommandOutput) -> Self {
        self.responses.insert(command.to_string(), output);
        self
    }
}

impl Shell for FakeShell {
    fn exec(&self, command: &str, _timeout: Duration) -> Result<CommandOutput, FleetPatchError> {
        Ok(self
            .responses
            .get(command)
            .cloned()
            .unwrap_or_else(|| failed(&format!("unscripted command: {command}"))))
    }

    fn host_name(&self) -> &str {
        &self.host_name
    }
}

/// Hands back a pre-built `FakeShell`, or fails the connection if the host was never wired up,
/// modeling an unreachable host.
struct FakeConnector {
    shells: RefCell<HashMap<String, FakeShell>>,
}

impl FakeConnector {
    fn new(shell: FakeShell) -> Self {
        let mut shells = HashMap::new();
        shells.insert(shell.host_name.clone(), shell);
        FakeConnector {
            shells: RefCell::new(shells),
        }
    }
}

impl ShellConnector for FakeConnector {
    fn connect(&self, host: &Host, _timeout: Duration) -> Result<Box<dyn Shell>, FleetPatchError> {
        match self.shells.borrow_mut().remove(&host.name) {
            Some(shell) => Ok(Box::new(shell)),
            None => Err(FleetPatchError::new(ConnectError::Tcp {
                host: host.name.clone(),
                port: 22,
            })),
        }
    }
}

/// A hypervisor double whose snapshot/rollback/task outcomes are set per test.
struct FakeHypervisor {
    create_ok: bool,
    rollback_ok: bool,
    wait_ok: bool,
    reboot_vm_ok: bool,
}

impl FakeHypervisor {
    fn working() -> Self {
        FakeHypervisor {
            create_ok: true,
            rollback_ok: true,
            wait_ok: true,
            reboot_vm_ok: true,
        }
    }
}

impl HypervisorApi for FakeHypervisor {
    fn create_snapshot(
        &self,
        _node: &str,
        _vmid: u32,
        _name: &str,
        _description: &str,
        _include_ram: bool,
    ) -> Result<String, HypervisorError> {
        if self.create_ok {
            Ok("UPID:create".to_string())
        } else {
            Err(HypervisorError::HttpStatus {
                path: "/snapshot".to_string(),
                status: 500,
                body: "snapshot create failed".to_string(),
            })
        }
    }

    fn delete_snapshot(&self, _node: &str, _vmid: u32, _name: &str) -> Result<String, HypervisorError> {
        Ok("UPID:delete".to_string())
    }

    fn rollback_snapshot(&self, _node: &str, _vmid: u32, _name: &str) -> Result<String, HypervisorError> {
        if self.rollback_ok {
            Ok("UPID:rollback".to_string())
        } else {
            Err(HypervisorError::HttpStatus {
                path: "/rollback".to_string(),
                status: 500,
                body: "rollback failed".to_string(),
            })
        }
    }

    fn list_snapshots(&self, _node: &str, _vmid: u32) -> Result<Vec<SnapshotInfo>, HypervisorError> {
        Ok(Vec::new())
    }

    fn wait_for_task(&self, _node: &str, upid: &str, _timeout: Duration) -> Result<(), HypervisorError> {
        if self.wait_ok {
            Ok(())
        } else {
            Err(HypervisorError::TaskFailed {
                upid: upid.to_string(),
                exitstatus: "ERROR".to_string(),
            })
        }
    }

    fn reboot_vm(&self, _node: &str, vmid: u32, _timeout: Duration) -> Result<(), HypervisorError> {
        if self.reboot_vm_ok {
            Ok(())
        } else {
            Err(HypervisorError::TaskTimeout {
                upid: format!("UPID:reboot:{vmid}"),
                waited_secs: 300,
            })
        }
    }
}

/// An availability prober whose reboot/wait outcomes are set per test; never sleeps or dials a
/// real host.
struct FakeProber {
    reboot_ok: bool,
    becomes_available: bool,
}

impl FakeProber {
    fn working() -> Self {
        FakeProber {
            reboot_ok: true,
            becomes_available: true,
        }
    }
}

impl HostProber for FakeProber {
    fn wait_for_availability(&self, _host: &Host, _max_wait: Duration, _check_interval: Duration, _use_ssh: bool) -> bool {
        self.becomes_available
    }

    fn reboot(&self, _host: &Host, _timeout: Duration) -> Result<(), FleetPatchError> {
        if self.reboot_ok {
            Ok(())
        } else {
            Err(FleetPatchError::new(ConnectError::Exec {
                host: "unused".to_string(),
            }))
        }
    }
}

#[test]
fn succeeds_end_to_end_with_snapshot_and_no_reboot() {
    let h = host("web1");
    let shell = FakeShell::ubuntu(&h.name)
        .with("apt-get update -qq", ok(""))
        .with(
            r#"apt list --upgradable 2>/dev/null | grep -v "WARNING""#,
            ok("curl/jammy-updates 8.5.0 amd64 [upgradable from: 8.4.0]\n"),
        )
        .with("DEBIAN_FRONTEND=noninteractive apt-get upgrade -y", ok(""));
    let config = updates_config();
    let mappings = vm_mapping(&h.name);
    let hypervisor = FakeHypervisor::working();
    let orchestrator = Orchestrator::with_collaborators(
        &config,
        Box::new(FakeConnector::new(shell)),
        Some(&hypervisor),
        &mappings,
        Box::new(FakeProber::working()),
    );

    let result = orchestrator.process_host(&h, Duration::from_secs(10));

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.snapshot_name.as_deref().map(|s| &s[..10]), Some("fleetpatch"));
    assert_eq!(result.updates.len(), 1);
}

#[test]
fn reports_no_updates_when_nothing_is_pending() {
    let h = host("web1");
    let shell = FakeShell::ubuntu(&h.name)
        .with("apt-get update -qq", ok(""))
        .with(r#"apt list --upgradable 2>/dev/null | grep -v "WARNING""#, ok(""));
    let config = updates_config();
    let mappings = vm_mapping(&h.name);
    let orchestrator = Orchestrator::with_collaborators(
        &config,
        Box::new(FakeConnector::new(shell)),
        None,
        &mappings,
        Box::new(FakeProber::working()),
    );

    let result = orchestrator.process_host(&h, Duration::from_secs(10));

    assert_eq!(result.outcome, Outcome::NoUpdates);
    assert!(result.updates.is_empty());
}

#[test]
fn opts_out_hosts_on_the_opt_out_list() {
    let h = host("web1");
    let shell = FakeShell::ubuntu(&h.name)
        .with("apt-get update -qq", ok(""))
        .with(
            r#"apt list --upgradable 2>/dev/null | grep -v "WARNING""#,
            ok("curl/jammy-updates 8.5.0 amd64 [upgradable from: 8.4.0]\n"),
        );
    let mut config = updates_config();
    config.opt_out_hosts.push(h.name.clone());
    let mappings = vm_mapping(&h.name);
    let orchestrator = Orchestrator::with_collaborators(
        &config,
        Box::new(FakeConnector::new(shell)),
        None,
        &mappings,
        Box::new(FakeProber::working()),
    );

    let result = orchestrator.process_host(&h, Duration::from_secs(10));

    assert_eq!(result.outcome, Outcome::OptOut);
    assert_eq!(result.updates.len(), 1);
}

#[test]
fn fails_snapshot_when_hypervisor_rejects_creation() {
    let h = host("web1");
    let shell = FakeShell::ubuntu(&h.name)
        .with("apt-get update -qq", ok(""))
        .with(
            r#"apt list --upgradable 2>/dev/null | grep -v "WARNING""#,
            ok("curl/jammy-updates 8.5.0 amd64 [upgradable from: 8.4.0]\n"),
        );
    let config = updates_config();
    let mappings = vm_mapping(&h.name);
    let hypervisor = FakeHypervisor {
        create_ok: false,
        ..FakeHypervisor::working()
    };
    let orchestrator = Orchestrator::with_collaborators(
        &config,
        Box::new(FakeConnector::new(shell)),
        Some(&hypervisor),
        &mappings,
        Box::new(FakeProber::working()),
    );

    let result = orchestrator.process_host(&h, Duration::from_secs(10));

    assert_eq!(result.outcome, Outcome::FailedSnapshot);
    assert!(result.snapshot_name.is_none());
}

#[test]
fn reverts_on_apply_failure_when_a_snapshot_exists() {
    let h = host("web1");
    let shell = FakeShell::ubuntu(&h.name)
        .with("apt-get update -qq", ok(""))
        .with(
            r#"apt list --upgradable 2>/dev/null | grep -v "WARNING""#,
            ok("curl/jammy-updates 8.5.0 amd64 [upgradable from: 8.4.0]\n"),
        )
        .with("DEBIAN_FRONTEND=noninteractive apt-get upgrade -y", failed("dpkg error"));
    let config = updates_config();
    let mappings = vm_mapping(&h.name);
    let hypervisor = FakeHypervisor::working();
    let orchestrator = Orchestrator::with_collaborators(
        &config,
        Box::new(FakeConnector::new(shell)),
        Some(&hypervisor),
        &mappings,
        Box::new(FakeProber::working()),
    );

    let result = orchestrator.process_host(&h, Duration::from_secs(10));

    assert_eq!(result.outcome, Outcome::Reverted);
}

#[test]
fn reports_revert_failed_when_apply_and_rollback_both_fail() {
    let h = host("web1");
    let shell = FakeShell::ubuntu(&h.name)
        .with("apt-get update -qq", ok(""))
        .with(
            r#"apt list --upgradable 2>/dev/null | grep -v "WARNING""#,
            ok("curl/jammy-updates 8.5.0 amd64 [upgradable from: 8.4.0]\n"),
        )
        .with("DEBIAN_FRONTEND=noninteractive apt-get upgrade -y", failed("dpkg error"));
    let config = updates_config();
    let mappings = vm_mapping(&h.name);
    let hypervisor = FakeHypervisor {
        rollback_ok: false,
        ..FakeHypervisor::working()
    };
    let orchestrator = Orchestrator::with_collaborators(
        &config,
        Box::new(FakeConnector::new(shell)),
        Some(&hypervisor),
        &mappings,
        Box::new(FakeProber::working()),
    );

    let result = orchestrator.process_host(&h, Duration::from_secs(10));

    assert_eq!(result.outcome, Outcome::RevertFailed);
}

#[test]
fn fails_updates_without_snapshot_support_when_apply_fails() {
    let h = host("web1");
    let shell = FakeShell::ubuntu(&h.name)
        .with("apt-get update -qq", ok(""))
        .with(
            r#"apt list --upgradable 2>/dev/null | grep -v "WARNING""#,
            ok("curl/jammy-updates 8.5.0 amd64 [upgradable from: 8.4.0]\n"),
        )
        .with("DEBIAN_FRONTEND=noninteractive apt-get upgrade -y", failed("dpkg error"));
    let config = updates_config();
    let mappings = vm_mapping(&h.name);
    let orchestrator = Orchestrator::with_collaborators(
        &config,
        Box::new(FakeConnector::new(shell)),
        None,
        &mappings,
        Box::new(FakeProber::working()),
    );

    let result = orchestrator.process_host(&h, Duration::from_secs(10));

    assert_eq!(result.outcome, Outcome::FailedUpdates);
}

#[test]
fn reverts_on_failed_reboot() {
    let h = host("web1");
    let shell = FakeShell::ubuntu(&h.name)
        .with("apt-get update -qq", ok(""))
        .with(
            r#"apt list --upgradable 2>/dev/null | grep -v "WARNING""#,
            ok("curl/jammy-updates 8.5.0 amd64 [upgradable from: 8.4.0]\n"),
        )
        .with("DEBIAN_FRONTEND=noninteractive apt-get upgrade -y", ok(""));
    let mut config = updates_config();
    config.reboot_after_updates = true;
    let mappings = vm_mapping(&h.name);
    let hypervisor = FakeHypervisor {
        reboot_vm_ok: false,
        ..FakeHypervisor::working()
    };
    let orchestrator = Orchestrator::with_collaborators(
        &config,
        Box::new(FakeConnector::new(shell)),
        Some(&hypervisor),
        &mappings,
        Box::new(FakeProber::working()),
    );

    let result = orchestrator.process_host(&h, Duration::from_secs(10));

    assert_eq!(result.outcome, Outcome::Reverted);
}

#[test]
fn reverts_on_failed_reboot_dispatch_without_hypervisor_mapping() {
    let h = host("web1");
    let shell = FakeShell::ubuntu(&h.name)
        .with("apt-get update -qq", ok(""))
        .with(
            r#"apt list --upgradable 2>/dev/null | grep -v "WARNING""#,
            ok("curl/jammy-updates 8.5.0 amd64 [upgradable from: 8.4.0]\n"),
        )
        .with("DEBIAN_FRONTEND=noninteractive apt-get upgrade -y", ok(""));
    let mut config = updates_config();
    config.reboot_after_updates = true;
    let mappings: HashMap<String, VmMapping> = HashMap::new();
    let prober = FakeProber {
        reboot_ok: false,
        ..FakeProber::working()
    };
    let orchestrator = Orchestrator::with_collaborators(
        &config,
        Box::new(FakeConnector::new(shell)),
        None,
        &mappings,
        Box::new(prober),
    );

    let result = orchestrator.process_host(&h, Duration::from_secs(10));

    assert_eq!(result.outcome, Outcome::FailedReboot);
}

#[test]
fn fails_availability_when_host_never_comes_back_after_reboot() {
    let h = host("web1");
    let shell = FakeShell::ubuntu(&h.name)
        .with("apt-get update -qq", ok(""))
        .with(
            r#"apt list --upgradable 2>/dev/null | grep -v "WARNING""#,
            ok("curl/jammy-updates 8.5.0 amd64 [upgradable from: 8.4.0]\n"),
        )
        .with("DEBIAN_FRONTEND=noninteractive apt-get upgrade -y", ok(""));
    let mut config = updates_config();
    config.reboot_after_updates = true;
    let mappings = vm_mapping(&h.name);
    let hypervisor = FakeHypervisor::working();
    let prober = FakeProber {
        becomes_available: false,
        ..FakeProber::working()
    };
    let orchestrator = Orchestrator::with_collaborators(
        &config,
        Box::new(FakeConnector::new(shell)),
        Some(&hypervisor),
        &mappings,
        Box::new(prober),
    );

    let result = orchestrator.process_host(&h, Duration::from_secs(10));

    assert_eq!(result.outcome, Outcome::Reverted);
}

#[test]
fn check_host_never_applies_updates() {
    let h = host("web1");
    let shell = FakeShell::ubuntu(&h.name)
        .with("apt-get update -qq", ok(""))
        .with(
            r#"apt list --upgradable 2>/dev/null | grep -v "WARNING""#,
            ok("curl/jammy-updates 8.5.0 amd64 [upgradable from: 8.4.0]\n"),
        );
    let config = updates_config();
    let mappings = vm_mapping(&h.name);
    let orchestrator = Orchestrator::with_collaborators(
        &config,
        Box::new(FakeConnector::new(shell)),
        None,
        &mappings,
        Box::new(FakeProber::working()),
    );

    let result = orchestrator.check_host(&h, Duration::from_secs(10));

    assert_eq!(result.outcome, Outcome::Success);
    assert!(result.snapshot_name.is_none());
}

#[test]
fn reports_failed_availability_when_connection_refused() {
    let h = host("unreachable");
    let config = updates_config();
    let mappings = vm_mapping(&h.name);
    let orchestrator = Orchestrator::with_collaborators(
        &config,
        Box::new(FakeConnector::new(FakeShell::ubuntu("someone-else"))),
        None,
        &mappings,
        Box::new(FakeProber::working()),
    );

    let result = orchestrator.check_host(&h, Duration::from_secs(10));

    assert_eq!(result.outcome, Outcome::FailedAvailability);
}
