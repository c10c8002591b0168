//! OpenBSD pkg_add adapter. No original-source counterpart; built in the same idiom as the other
//! adapters to cover OpenBSD hosts that `sysdefs::os_family` recognizes (see DESIGN.md). OpenBSD
//! has no separate cache-refresh step; `pkg_add -u -n` is a dry run used both to refresh the
//! mirror's package list and to enumerate candidates.

use fleetpatch_api::error::{FleetPatchError, PackageManagerError};
use fleetpatch_api::model::{PackageManagerKind, PackageUpdate};
use regex::Regex;

use super::{check_output_lenient, run_checked, PackageManager, APPLY_TIMEOUT, CHECK_TIMEOUT, REFRESH_TIMEOUT};
use crate::remote::Shell;

const NAME: &str = "pkg_add";

pub struct PkgAdd;

impl PackageManager for PkgAdd {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::PkgAdd
    }

    fn refresh_cache(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        run_checked(shell, "pkg_add -u -n >/dev/null", REFRESH_TIMEOUT, || PackageManagerError::RefreshCache {
            manager: NAME,
            host: shell.host_name().to_string(),
        })?;
        Ok(())
    }

    fn check_updates(&self, shell: &dyn Shell) -> Result<Vec<PackageUpdate>, FleetPatchError> {
        let output = check_output_lenient(shell, "pkg_add -u -n", CHECK_TIMEOUT, NAME)?;
        Ok(parse_pkg_add_output(&output))
    }

    fn apply_updates(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        run_checked(shell, "pkg_add -u", APPLY_TIMEOUT, || PackageManagerError::ApplyUpdates {
            manager: NAME,
            host: shell.host_name().to_string(),
        })?;
        Ok(())
    }
}

fn parse_pkg_add_output(output: &str) -> Vec<PackageUpdate> {
    let line_re = Regex::new(r"(?P<name>\S+?)-(?P<old>\d\S*)->\S+?-(?P<new>\d\S*)").expect("static regex");

    output
        .trim()
        .lines()
        .filter_map(|line| {
            let caps = line_re.captures(line)?;
            Some(PackageUpdate {
                name: caps["name"].to_string(),
                current_version: Some(caps["old"].to_string()),
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
    fn parses_update_candidates() {
        let output = "curl-8.4.0->curl-8.5.0: ok\n";
        let updates = parse_pkg_add_output(output);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].name, "curl");
        assert_eq!(updates[0].current_version.as_deref(), Some("8.4.0"));
        assert_eq!(updates[0].new_version, "8.5.0");
    }
}
