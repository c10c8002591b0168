//! Homebrew adapter for macOS hosts. No original-source counterpart; built in the same idiom as
//! the other adapters (see DESIGN.md).

use fleetpatch_api::error::{FleetPatchError, PackageManagerError};
use fleetpatch_api::model::{PackageManagerKind, PackageUpdate};
use regex::Regex;

use super::{check_output_lenient, run_checked, PackageManager, APPLY_TIMEOUT, CHECK_TIMEOUT, REFRESH_TIMEOUT};
use crate::remote::Shell;

const NAME: &str = "brew";

pub struct Brew;

impl PackageManager for Brew {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Brew
    }

    fn refresh_cache(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        run_checked(shell, "brew update", REFRESH_TIMEOUT, || PackageManagerError::RefreshCache {
            manager: NAME,
            host: shell.host_name().to_string(),
        })?;
        Ok(())
    }

    fn check_updates(&self, shell: &dyn Shell) -> Result<Vec<PackageUpdate>, FleetPatchError> {
        let output = check_output_lenient(shell, "brew outdated --verbose", CHECK_TIMEOUT, NAME)?;
        Ok(parse_brew_outdated(&output))
    }

    fn apply_updates(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        self.refresh_cache(shell)?;
        run_checked(shell, "brew upgrade", APPLY_TIMEOUT, || PackageManagerError::ApplyUpdates {
            manager: NAME,
            host: shell.host_name().to_string(),
        })?;
        Ok(())
    }
}

fn parse_brew_outdated(output: &str) -> Vec<PackageUpdate> {
    let line_re = Regex::new(r"^(\S+)\s+\(([^)]+)\)\s+<\s+(\S+)").expect("static regex");

    output
        .trim()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let caps = line_re.captures(line)?;
            Some(PackageUpdate {
                name: caps.get(1)?.as_str().to_string(),
                current_version: Some(caps.get(2)?.as_str().to_string()),
                new_version: caps.get(3)?.as_str().to_string(),
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
    fn parses_outdated_output() {
        let output = "git (2.40.1) < 2.42.0\njq (1.6) < 1.7\n";
        let updates = parse_brew_outdated(output);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].name, "git");
        assert_eq!(updates[0].current_version.as_deref(), Some("2.40.1"));
        assert_eq!(updates[0].new_version, "2.42.0");
    }
}
