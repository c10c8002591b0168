//! Debian/Ubuntu APT adapter, grounded on `package_managers.py`'s `AptPackageManager`.

use fleetpatch_api::error::{FleetPatchError, PackageManagerError};
use fleetpatch_api::model::{PackageManagerKind, PackageUpdate};
use regex::Regex;

use super::{check_output_lenient, run_checked, PackageManager, APPLY_TIMEOUT, CHECK_TIMEOUT, REFRESH_TIMEOUT};
use crate::remote::Shell;

const NAME: &str = "apt";

pub struct Apt;

impl PackageManager for Apt {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Apt
    }

    fn refresh_cache(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        run_checked(shell, "apt-get update -qq", REFRESH_TIMEOUT, || PackageManagerError::RefreshCache {
            manager: NAME,
            host: shell.host_name().to_string(),
        })?;
        Ok(())
    }

    fn check_updates(&self, shell: &dyn Shell) -> Result<Vec<PackageUpdate>, FleetPatchError> {
        let output = check_output_lenient(
            shell,
            r#"apt list --upgradable 2>/dev/null | grep -v "WARNING""#,
            CHECK_TIMEOUT,
            NAME,
        )?;
        Ok(parse_apt_list(&output))
    }

    fn apply_updates(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        self.refresh_cache(shell)?;
        run_checked(
            shell,
            "DEBIAN_FRONTEND=noninteractive apt-get upgrade -y",
            APPLY_TIMEOUT,
            || PackageManagerError::ApplyUpdates {
                manager: NAME,
                host: shell.host_name().to_string(),
            },
        )?;
        Ok(())
    }
}

fn parse_apt_list(output: &str) -> Vec<PackageUpdate> {
    let line_re = Regex::new(
        r"^([^/]+)/([^\s]+)\s+([^\s]+)\s+([^\s]+)(?:\s+\[upgradable from:\s+([^\]]+)\])?",
    )
    .expect("static regex");

    output
        .trim()
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.contains("Listing..."))
        .filter_map(|line| {
            let caps = line_re.captures(line)?;
            let name = caps.get(1)?.as_str().to_string();
            let repository = caps.get(2)?.as_str().to_string();
            let new_version = caps.get(3)?.as_str().to_string();
            let current_version = caps.get(5).map(|m| m.as_str().to_string());
            Some(PackageUpdate {
                name,
                current_version,
                new_version,
                is_security: repository.contains("-security") || repository.contains("-updates"),
                repository,
                description: None,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_upgradable_list() {
        let output = "Listing...\n\
            curl/jammy-updates 7.81.0-1ubuntu1.15 amd64 [upgradable from: 7.81.0-1ubuntu1.14]\n\
            bash/jammy-security 5.1-6ubuntu1.1 amd64 [upgradable from: 5.1-6ubuntu1]\n";
        let updates = parse_apt_list(output);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].name, "curl");
        assert_eq!(updates[0].current_version.as_deref(), Some("7.81.0-1ubuntu1.14"));
        assert_eq!(updates[0].new_version, "7.81.0-1ubuntu1.15");
        assert!(updates[0].is_security);
        assert!(updates[1].is_security);
    }
}
