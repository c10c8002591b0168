//! openSUSE Zypper adapter, grounded on `package_managers.py`'s `ZypperPackageManager`.

use fleetpatch_api::error::{FleetPatchError, PackageManagerError};
use fleetpatch_api::model::{PackageManagerKind, PackageUpdate};

use super::{check_output_lenient, run_checked, PackageManager, APPLY_TIMEOUT, CHECK_TIMEOUT, REFRESH_TIMEOUT};
use crate::remote::Shell;

const NAME: &str = "zypper";

pub struct Zypper;

impl PackageManager for Zypper {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Zypper
    }

    fn refresh_cache(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        run_checked(shell, "zypper --quiet refresh", REFRESH_TIMEOUT, || PackageManagerError::RefreshCache {
            manager: NAME,
            host: shell.host_name().to_string(),
        })?;
        Ok(())
    }

    fn check_updates(&self, shell: &dyn Shell) -> Result<Vec<PackageUpdate>, FleetPatchError> {
        let output = check_output_lenient(shell, "zypper --quiet list-updates", CHECK_TIMEOUT, NAME)?;
        Ok(parse_zypper_output(&output))
    }

    fn apply_updates(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        self.refresh_cache(shell)?;
        run_checked(shell, "zypper --non-interactive update", APPLY_TIMEOUT, || PackageManagerError::ApplyUpdates {
            manager: NAME,
            host: shell.host_name().to_string(),
        })?;
        Ok(())
    }
}

fn parse_zypper_output(output: &str) -> Vec<PackageUpdate> {
    output
        .trim()
        .lines()
        .filter(|line| line.starts_with("v |"))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('|').map(str::trim).collect();
            if parts.len() < 5 {
                return None;
            }
            Some(PackageUpdate {
                name: parts[2].to_string(),
                current_version: Some(parts[3].to_string()),
                new_version: parts[4].to_string(),
                repository: parts[1].to_string(),
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
    fn parses_list_updates() {
        let output = "S | Repository | Name  | Current Version | Available Version | Arch\n\
            --+------------+-------+------------------+--------------------+------\n\
            v | repo-oss   | vim   | 8.0-1            | 8.2-1              | x86_64\n";
        let updates = parse_zypper_output(output);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].name, "vim");
        assert_eq!(updates[0].new_version, "8.2-1");
    }
}
