//! Host availability probing, grounded on `host_checker.py`'s `HostChecker`: a local `ping`
//! shell-out, an SSH round-trip to confirm the host is actually accepting commands (not just
//! answering ICMP), and the reboot-over-SSH helper the orchestrator uses after applying updates.

use std::process::Command;
use std::time::{Duration, Instant};

use fleetpatch_api::error::{FleetPatchError, FleetPatchResultExt};
use fleetpatch_api::model::Host;
use log::{debug, info, warn};
use osutils::exe::OutputChecker;

use crate::config::SshConfig;
use crate::remote::RemoteShell;

/// Sends a single ICMP echo request with a `timeout`-second deadline.
pub fn ping(address: &str, timeout: Duration) -> bool {
    Command::new("ping")
        .arg("-c")
        .arg("1")
        .arg("-W")
        .arg(timeout.as_secs().max(1).to_string())
        .arg(address)
        .output()
        .is_success()
}

/// Confirms the host is not just pinging but actually accepting SSH commands.
fn check_ssh_connectivity(host: &Host, ssh_config: &SshConfig) -> bool {
    let shell = match RemoteShell::connect(host, ssh_config, Duration::from_secs(10)) {
        Ok(shell) => shell,
        Err(e) => {
            debug!("SSH connectivity check failed for {}: {e:?}", host.name);
            return false;
        }
    };

    matches!(shell.exec("echo test", Duration::from_secs(5)), Ok(output) if output.success())
}

/// Polls `host` until it responds to ping (and, if `use_ssh`, accepts SSH commands too), or
/// `max_wait` elapses.
pub fn wait_for_availability(
    host: &Host,
    ssh_config: &SshConfig,
    max_wait: Duration,
    check_interval: Duration,
    use_ssh: bool,
) -> bool {
    info!(
        "Waiting for {} to become available (timeout: {}s)",
        host.name,
        max_wait.as_secs()
    );

    let start = Instant::now();
    let mut attempt = 0u32;

    while start.elapsed() < max_wait {
        attempt += 1;
        debug!(
            "Checking {} availability - attempt {attempt} ({}s elapsed)",
            host.name,
            start.elapsed().as_secs()
        );

        if !ping(&host.address, Duration::from_secs(5)) {
            debug!("{} not responding to ping", host.name);
            std::thread::sleep(check_interval);
            continue;
        }
        debug!("{} responding to ping", host.name);

        if use_ssh {
            if check_ssh_connectivity(host, ssh_config) {
                info!("{} is available (ping + SSH) after {}s", host.name, start.elapsed().as_secs());
                return true;
            }
            debug!("{} ping OK but SSH not ready", host.name);
        } else {
            info!("{} is available (ping only) after {}s", host.name, start.elapsed().as_secs());
            return true;
        }

        std::thread::sleep(check_interval);
    }

    warn!("{} did not become available within {}s", host.name, start.elapsed().as_secs());
    false
}

/// Connects and sends a reboot command. The connection is expected to drop mid-command as the
/// host goes down, so only the connect step's failure is treated as an error.
pub fn reboot_via_ssh(host: &Host, ssh_config: &SshConfig, timeout: Duration) -> Result<(), FleetPatchError> {
    let shell = RemoteShell::connect(host, ssh_config, timeout).message("connecting to send reboot command")?;

    info!("Sending reboot command to {}", host.name);
    let _ = shell.exec("shutdown -r now || reboot", Duration::from_secs(5));
    info!("Reboot command sent to {}", host.name);
    Ok(())
}

/// Availability polling and reboot dispatch for a single host. Lets the orchestrator's
/// post-update verification be tested against a fake that never touches the network or a clock.
pub trait HostProber {
    fn wait_for_availability(
        &self,
        host: &Host,
        max_wait: Duration,
        check_interval: Duration,
        use_ssh: bool,
    ) -> bool;

    fn reboot(&self, host: &Host, timeout: Duration) -> Result<(), FleetPatchError>;
}

pub struct SshProber<'a> {
    pub ssh_config: &'a SshConfig,
}

impl<'a> HostProber for SshProber<'a> {
    fn wait_for_availability(
        &self,
        host: &Host,
        max_wait: Duration,
        check_interval: Duration,
        use_ssh: bool,
    ) -> bool {
        wait_for_availability(host, self.ssh_config, max_wait, check_interval, use_ssh)
    }

    fn reboot(&self, host: &Host, timeout: Duration) -> Result<(), FleetPatchError> {
        reboot_via_ssh(host, self.ssh_config, timeout)
    }
}
