//! Package manager adapters, grounded on `package_managers.py`'s abstract `PackageManager` base
//! and its `apt`/`yum`/`dnf`/`zypper`/`pacman`/`pkg` implementations. `apk`/`brew`/`pkg_add` have
//! no original-source counterpart and are built in the same idiom to cover the OS families
//! `sysdefs::os_family` already recognizes (see DESIGN.md).

mod apk;
mod apt;
mod brew;
mod dnf;
mod pacman;
mod pkg;
mod pkg_add;
mod yum;
mod zypper;

use std::time::Duration;

use fleetpatch_api::error::{FleetPatchError, PackageManagerError, ReportError};
use fleetpatch_api::model::{PackageManagerKind, PackageUpdate};
use log::warn;

use crate::remote::Shell;

/// Per-operation command timeouts, uniform across every adapter and matching the original's
/// `refresh`/`list`/`apply` timeouts (`package_managers.py`).
pub(crate) const REFRESH_TIMEOUT: Duration = Duration::from_secs(300);
pub(crate) const CHECK_TIMEOUT: Duration = Duration::from_secs(120);
pub(crate) const APPLY_TIMEOUT: Duration = Duration::from_secs(1800);

/// A single package-manager adapter. Implementations are expected to be stateless; all state
/// lives in the `Shell` they're given.
pub trait PackageManager {
    fn kind(&self) -> PackageManagerKind;

    /// Refreshes the package index/cache. Idempotent, safe to call before both `check_updates`
    /// and `apply_updates`.
    fn refresh_cache(&self, shell: &dyn Shell) -> Result<(), FleetPatchError>;

    /// Lists packages with a pending update, security-marked where the adapter can tell.
    fn check_updates(&self, shell: &dyn Shell) -> Result<Vec<PackageUpdate>, FleetPatchError>;

    /// Applies every pending update non-interactively.
    fn apply_updates(&self, shell: &dyn Shell) -> Result<(), FleetPatchError>;
}

/// Returns the adapter for `kind`, or `None` for [`PackageManagerKind::Unknown`].
pub fn for_kind(kind: PackageManagerKind) -> Option<Box<dyn PackageManager>> {
    match kind {
        PackageManagerKind::Apt => Some(Box::new(apt::Apt)),
        PackageManagerKind::Yum => Some(Box::new(yum::Yum)),
        PackageManagerKind::Dnf => Some(Box::new(dnf::Dnf)),
        PackageManagerKind::Zypper => Some(Box::new(zypper::Zypper)),
        PackageManagerKind::Pacman => Some(Box::new(pacman::Pacman)),
        PackageManagerKind::Pkg => Some(Box::new(pkg::Pkg)),
        PackageManagerKind::PkgAdd => Some(Box::new(pkg_add::PkgAdd)),
        PackageManagerKind::Apk => Some(Box::new(apk::Apk)),
        PackageManagerKind::Brew => Some(Box::new(brew::Brew)),
        PackageManagerKind::Unknown => None,
    }
}

/// Runs `command` and turns a non-zero exit into the given error variant, the way every adapter
/// in the original treated a failing subprocess as an adapter-level failure rather than a
/// connection failure.
fn run_checked(
    shell: &dyn Shell,
    command: &str,
    timeout: Duration,
    on_failure: impl FnOnce() -> PackageManagerError,
) -> Result<String, FleetPatchError> {
    let output = shell.exec(command, timeout)?;
    if !output.success() {
        return Err(FleetPatchError::new(on_failure()));
    }
    Ok(output.stdout)
}

/// Runs `command` for a `check_updates` pass. A failed SSH round-trip still propagates, but a
/// non-zero exit just logs a warning and yields no updates, matching every adapter in the
/// original (`logger.warning(...); return updates`) rather than failing the whole host.
fn check_output_lenient(
    shell: &dyn Shell,
    command: &str,
    timeout: Duration,
    manager: &'static str,
) -> Result<String, FleetPatchError> {
    let output = shell.exec(command, timeout)?;
    if !output.success() {
        warn!(
            "{manager} check-updates command failed on host '{}': {}",
            shell.host_name(),
            output.stderr.trim()
        );
        return Ok(String::new());
    }
    Ok(output.stdout)
}
