//! CentOS/RHEL 7 YUM adapter, grounded on `package_managers.py`'s `YumPackageManager`.

use std::collections::HashSet;

use fleetpatch_api::error::{FleetPatchError, PackageManagerError};
use fleetpatch_api::model::{PackageManagerKind, PackageUpdate};
use log::warn;

use super::{PackageManager, APPLY_TIMEOUT, CHECK_TIMEOUT, REFRESH_TIMEOUT};
use crate::remote::Shell;

const NAME: &str = "yum";

pub struct Yum;

impl PackageManager for Yum {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Yum
    }

    fn refresh_cache(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        let output = shell.exec("yum clean all && yum makecache fast", REFRESH_TIMEOUT)?;
        if !output.success() {
            return Err(FleetPatchError::new(PackageManagerError::RefreshCache {
                manager: NAME,
                host: shell.host_name().to_string(),
            }));
        }
        Ok(())
    }

    fn check_updates(&self, shell: &dyn Shell) -> Result<Vec<PackageUpdate>, FleetPatchError> {
        check_updates_with(shell, NAME, "yum check-update --quiet", "yum --security check-update --quiet")
    }

    fn apply_updates(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        self.refresh_cache(shell)?;
        let output = shell.exec("yum update -y", APPLY_TIMEOUT)?;
        if !output.success() {
            return Err(FleetPatchError::new(PackageManagerError::ApplyUpdates {
                manager: NAME,
                host: shell.host_name().to_string(),
            }));
        }
        Ok(())
    }
}

/// `yum check-update`/`dnf check-update` return exit code 100, not 0, when updates are pending;
/// 0 means the cache is up to date with nothing to do. Anything else logs a warning and yields
/// no updates rather than failing the host, matching the original.
pub(super) fn check_updates_with(
    shell: &dyn Shell,
    manager: &'static str,
    check_command: &str,
    security_command: &str,
) -> Result<Vec<PackageUpdate>, FleetPatchError> {
    let output = shell.exec(check_command, CHECK_TIMEOUT)?;
    if output.exit_code != 0 && output.exit_code != 100 {
        warn!(
            "{manager} check-update failed on host '{}': {}",
            shell.host_name(),
            output.stderr.trim()
        );
        return Ok(Vec::new());
    }
    if output.exit_code != 100 {
        return Ok(Vec::new());
    }

    let mut updates = parse_yum_output(&output.stdout);
    mark_security_updates(shell, security_command, &mut updates);
    Ok(updates)
}

pub(super) fn parse_yum_output(output: &str) -> Vec<PackageUpdate> {
    output
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && !line.starts_with("Loaded plugins") && !line.starts_with("Loading mirror")
        })
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                return None;
            }
            let package_arch = parts[0];
            let new_version = parts[1].to_string();
            let repository = parts[2].to_string();
            let name = package_arch.rsplit_once('.').map(|(n, _)| n).unwrap_or(package_arch).to_string();
            Some(PackageUpdate {
                name,
                current_version: Some("installed".to_string()),
                new_version,
                repository,
                description: None,
                is_security: false,
            })
        })
        .collect()
}

fn mark_security_updates(shell: &dyn Shell, security_command: &str, updates: &mut [PackageUpdate]) {
    let Ok(output) = shell.exec(security_command, CHECK_TIMEOUT) else {
        return;
    };
    if output.exit_code != 100 {
        return;
    }

    let security_packages: HashSet<String> = output
        .stdout
        .trim()
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|package_arch| {
            package_arch
                .rsplit_once('.')
                .map(|(n, _)| n)
                .unwrap_or(package_arch)
                .to_string()
        })
        .collect();

    for update in updates.iter_mut() {
        if security_packages.contains(&update.name) {
            update.is_security = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_check_update_output() {
        let output = "Loaded plugins: fastestmirror\n\
            kernel.x86_64  4.18.0-500.el8  baseos\n\
            bash.x86_64    4.4.20-4.el8    baseos\n";
        let updates = parse_yum_output(output);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].name, "kernel");
        assert_eq!(updates[0].new_version, "4.18.0-500.el8");
    }
}
