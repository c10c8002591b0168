//! Fedora/RHEL 8+ DNF adapter, grounded on `package_managers.py`'s `DnfPackageManager`, which
//! reuses the YUM output parser verbatim (`_parse_dnf_output` just calls
//! `YumPackageManager._parse_yum_output`).

use fleetpatch_api::error::{FleetPatchError, PackageManagerError};
use fleetpatch_api::model::{PackageManagerKind, PackageUpdate};

use super::yum::check_updates_with;
use super::{PackageManager, APPLY_TIMEOUT, REFRESH_TIMEOUT};
use crate::remote::Shell;

const NAME: &str = "dnf";

pub struct Dnf;

impl PackageManager for Dnf {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Dnf
    }

    fn refresh_cache(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        let output = shell.exec("dnf clean all && dnf makecache", REFRESH_TIMEOUT)?;
        if !output.success() {
            return Err(FleetPatchError::new(PackageManagerError::RefreshCache {
                manager: NAME,
                host: shell.host_name().to_string(),
            }));
        }
        Ok(())
    }

    fn check_updates(&self, shell: &dyn Shell) -> Result<Vec<PackageUpdate>, FleetPatchError> {
        check_updates_with(shell, NAME, "dnf check-update --quiet", "dnf --security check-update --quiet")
    }

    fn apply_updates(&self, shell: &dyn Shell) -> Result<(), FleetPatchError> {
        self.refresh_cache(shell)?;
        let output = shell.exec("dnf update -y", APPLY_TIMEOUT)?;
        if !output.success() {
            return Err(FleetPatchError::new(PackageManagerError::ApplyUpdates {
                manager: NAME,
                host: shell.host_name().to_string(),
            }));
        }
        Ok(())
    }
}
