//! Arch Linux Pacman adapter, grounded on `package_managers.py`'s `PackmanPackageManager`.

use fleetpatch_api::error::{FleetPatchError, PackageManagerError};
use fleetpatch_api::model::{PackageManagerKind, PackageUpdate};
use log::warn;

use super::{PackageManager, APPLY_TIMEOUT, CHECK_TIMEOUT, REFRESH_TIMEOUT};
use crate::remote::Shell;

const NAME: &str = "pacman";

pub struct Pacman;

impl PackageManager for Pacman {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Pacman
    }

    fn refresh_cache(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        let output = shell.exec("pacman -Sy", REFRESH_TIMEOUT)?;
        if !output.success() {
            return Err(FleetPatchError::new(PackageManagerError::RefreshCache {
                manager: NAME,
                host: shell.host_name().to_string(),
            }));
        }
        Ok(())
    }

    fn check_updates(&self, shell: &dyn Shell) -> Result<Vec<PackageUpdate>, FleetPatchError> {
        let output = shell.exec("pacman -Qu", CHECK_TIMEOUT)?;
        // pacman -Qu exits 1 when there is simply nothing to upgrade.
        if output.exit_code != 0 && output.exit_code != 1 {
            warn!("pacman query failed on host '{}': {}", shell.host_name(), output.stderr.trim());
            return Ok(Vec::new());
        }
        if output.exit_code != 0 {
            return Ok(Vec::new());
        }
        Ok(parse_pacman_output(&output.stdout))
    }

    fn apply_updates(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        self.refresh_cache(shell)?;
        let output = shell.exec("pacman -Su --noconfirm", APPLY_TIMEOUT)?;
        if !output.success() {
            return Err(FleetPatchError::new(PackageManagerError::ApplyUpdates {
                manager: NAME,
                host: shell.host_name().to_string(),
            }));
        }
        Ok(())
    }
}

fn parse_pacman_output(output: &str) -> Vec<PackageUpdate> {
    output
        .trim()
        .lines()
        .filter(|line| line.contains("->"))
        .filter_map(|line| {
            let (left, new_version) = line.split_once("->")?;
            let left = left.trim();
            let new_version = new_version.trim().to_string();

            let mut name_version = left.split_whitespace();
            let name = name_version.next()?.to_string();
            let current_version = name_version.next().map(str::to_string);

            Some(PackageUpdate {
                name,
                current_version,
                new_version,
                repository: String::new(),
                description: None,
                is_security: false,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_qu_output() {
        let output = "linux 6.6.1-1 -> 6.6.2-1\nsystemd 254.5-1 -> 254.6-1\n";
        let updates = parse_pacman_output(output);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].name, "linux");
        assert_eq!(updates[0].current_version.as_deref(), Some("6.6.1-1"));
        assert_eq!(updates[0].new_version, "6.6.2-1");
    }
}
