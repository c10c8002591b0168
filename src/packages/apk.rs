//! Alpine Linux apk adapter. No original-source counterpart; built in the same idiom as the
//! other adapters to cover Alpine hosts that `sysdefs::os_family` recognizes (see DESIGN.md).

use fleetpatch_api::error::{FleetPatchError, PackageManagerError};
use fleetpatch_api::model::{PackageManagerKind, PackageUpdate};
use regex::Regex;

use super::{check_output_lenient, run_checked, PackageManager, APPLY_TIMEOUT, CHECK_TIMEOUT, REFRESH_TIMEOUT};
use crate::remote::Shell;

const NAME: &str = "apk";

pub struct Apk;

impl PackageManager for Apk {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Apk
    }

    fn refresh_cache(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        run_checked(shell, "apk update", REFRESH_TIMEOUT, || PackageManagerError::RefreshCache {
            manager: NAME,
            host: shell.host_name().to_string(),
        })?;
        Ok(())
    }

    fn check_updates(&self, shell: &dyn Shell) -> Result<Vec<PackageUpdate>, FleetPatchError> {
        let output = check_output_lenient(shell, "apk list --upgradable 2>/dev/null", CHECK_TIMEOUT, NAME)?;
        Ok(parse_apk_list(&output))
    }

    fn apply_updates(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        self.refresh_cache(shell)?;
        run_checked(shell, "apk upgrade --no-cache", APPLY_TIMEOUT, || PackageManagerError::ApplyUpdates {
            manager: NAME,
            host: shell.host_name().to_string(),
        })?;
        Ok(())
    }
}

fn parse_apk_list(output: &str) -> Vec<PackageUpdate> {
    let line_re = Regex::new(r"^(?P<name>\S+?)-(?P<version>\d\S*)\s+<\s+(?P<new>\S+)").expect("static regex");

    output
        .trim()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let caps = line_re.captures(line)?;
            Some(PackageUpdate {
                name: caps["name"].to_string(),
                current_version: Some(caps["version"].to_string()),
                new_version: caps["new"].to_string(),
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
    fn parses_upgradable_list() {
        let output = "musl-1.2.4-r0 < 1.2.5-r0 x86_64 {musl} (MIT)\n";
        let updates = parse_apk_list(output);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].name, "musl");
        assert_eq!(updates[0].current_version.as_deref(), Some("1.2.4-r0"));
        assert_eq!(updates[0].new_version, "1.2.5-r0");
    }
}
