//! FreeBSD pkg adapter, grounded on `package_managers.py`'s `PkgPackageManager`. FreeBSD pkg has
//! no built-in security classification the way APT's security repositories do, so updates here
//! are never marked as security updates.

use fleetpatch_api::error::{FleetPatchError, PackageManagerError};
use fleetpatch_api::model::{PackageManagerKind, PackageUpdate};
use regex::Regex;

use super::{check_output_lenient, run_checked, PackageManager, APPLY_TIMEOUT, CHECK_TIMEOUT, REFRESH_TIMEOUT};
use crate::remote::Shell;

const NAME: &str = "pkg";

pub struct Pkg;

impl PackageManager for Pkg {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Pkg
    }

    fn refresh_cache(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        run_checked(shell, "pkg update", REFRESH_TIMEOUT, || PackageManagerError::RefreshCache {
            manager: NAME,
            host: shell.host_name().to_string(),
        })?;
        Ok(())
    }

    fn check_updates(&self, shell: &dyn Shell) -> Result<Vec<PackageUpdate>, FleetPatchError> {
        let output = check_output_lenient(shell, "pkg version -vL=", CHECK_TIMEOUT, NAME)?;
        Ok(parse_pkg_output(&output))
    }

    fn apply_updates(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        self.refresh_cache(shell)?;
        run_checked(shell, "pkg upgrade -y", APPLY_TIMEOUT, || PackageManagerError::ApplyUpdates {
            manager: NAME,
            host: shell.host_name().to_string(),
        })?;
        Ok(())
    }
}

fn parse_pkg_output(output: &str) -> Vec<PackageUpdate> {
    let port_has_re = Regex::new(r"port has ([^)]+)").expect("static regex");

    output
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.contains('<') && line.contains("needs updating"))
        .filter_map(|line| {
            let (left, right) = line.split_once('<')?;
            let left = left.trim();
            let right = right.trim();

            let (name, current_version) = match left.rfind('-') {
                Some(idx) => (left[..idx].to_string(), Some(left[idx + 1..].to_string())),
                None => (left.to_string(), None),
            };

            let new_version = port_has_re
                .captures(right)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "unknown".to_string());

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
    fn parses_version_output() {
        let output = "curl-8.4.0 < needs updating (port has 8.5.0)\nvim-9.0 = up-to-date with port\n";
        let updates = parse_pkg_output(output);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].name, "curl");
        assert_eq!(updates[0].current_version.as_deref(), Some("8.4.0"));
        assert_eq!(updates[0].new_version, "8.5.0");
    }
}
