use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single managed host as resolved from the inventory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Host {
    pub name: String,
    pub address: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub vars: std::collections::BTreeMap<String, String>,
}

fn default_ssh_port() -> u16 {
    22
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.name, self.address, self.port)
    }
}

/// The broad OS family a host belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum_macros::IntoStaticStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OsFamily {
    Linux,
    Darwin,
    FreeBsd,
    OpenBsd,
    Unknown,
}

/// The package manager adapter to drive on a given host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum_macros::IntoStaticStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PackageManagerKind {
    Apt,
    Yum,
    Dnf,
    Zypper,
    Pacman,
    Pkg,
    PkgAdd,
    Apk,
    Brew,
    Unknown,
}

impl PackageManagerKind {
    pub fn binary_name(&self) -> &'static str {
        match self {
            PackageManagerKind::Apt => "apt-get",
            PackageManagerKind::Yum => "yum",
            PackageManagerKind::Dnf => "dnf",
            PackageManagerKind::Zypper => "zypper",
            PackageManagerKind::Pacman => "pacman",
            PackageManagerKind::Pkg => "pkg",
            PackageManagerKind::PkgAdd => "pkg_add",
            PackageManagerKind::Apk => "apk",
            PackageManagerKind::Brew => "brew",
            PackageManagerKind::Unknown => "unknown",
        }
    }
}

/// Operating system facts gathered by probing a single host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OsInfo {
    pub family: OsFamily,
    pub distribution: String,
    pub version: String,
    pub architecture: String,
    pub package_manager: PackageManagerKind,
}

/// A single package with an update pending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageUpdate {
    pub name: String,
    pub current_version: Option<String>,
    pub new_version: String,
    /// Source repository/channel the update comes from, where the adapter's command output
    /// names one; empty when the package manager doesn't report it.
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_security: bool,
}

/// Mapping from an inventory host name to the hypervisor-managed VM backing it.
///
/// `endpoint`/`username`/`password` are per-VM overrides for standalone (non-clustered)
/// hypervisor nodes; when absent the global hypervisor configuration is used instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmMapping {
    pub host: String,
    pub node: String,
    pub vmid: u32,
    #[serde(default)]
    pub max_snapshots: Option<u32>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// The terminal state a single host's run reached. Ordering matters: variants are listed in the
/// severity order used when grouping a fleet-wide report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum_macros::IntoStaticStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// A rollback itself failed; the host may be left in an inconsistent state.
    RevertFailed,
    /// Updates or the post-reboot check failed and the snapshot was successfully restored.
    Reverted,
    /// No reachable snapshot could be taken before changing the host.
    FailedSnapshot,
    /// Package manager reported an error while applying updates.
    FailedUpdates,
    /// The host did not come back up, or come back healthy, after reboot.
    FailedReboot,
    /// The host never became reachable for the initial connection attempt.
    FailedAvailability,
    /// The host is configured to opt out of automated updates.
    OptOut,
    /// Everything completed: snapshot, update, reboot, verify.
    Success,
    /// The host had no pending updates.
    NoUpdates,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, Outcome::Success | Outcome::NoUpdates | Outcome::OptOut)
    }
}

/// The result of processing a single host, either in check-only or automated mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateResult {
    pub host: String,
    pub outcome: Outcome,
    #[serde(default)]
    pub os_info: Option<OsInfo>,
    #[serde(default)]
    pub updates: Vec<PackageUpdate>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub vm_node: Option<String>,
    #[serde(default)]
    pub vm_id: Option<u32>,
    #[serde(default)]
    pub snapshot_name: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl UpdateResult {
    pub fn security_updates(&self) -> impl Iterator<Item = &PackageUpdate> {
        self.updates.iter().filter(|u| u.is_security)
    }

    pub fn regular_updates(&self) -> impl Iterator<Item = &PackageUpdate> {
        self.updates.iter().filter(|u| !u.is_security)
    }
}

/// The aggregate report produced after a fleet-wide pass, grouped by [`Outcome`] severity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FleetReport {
    pub results: Vec<UpdateResult>,
}

impl FleetReport {
    pub fn grouped(&self) -> Vec<(Outcome, Vec<&UpdateResult>)> {
        use Outcome::*;
        let order = [
            RevertFailed,
            Reverted,
            FailedSnapshot,
            FailedUpdates,
            FailedReboot,
            FailedAvailability,
            OptOut,
            Success,
            NoUpdates,
        ];
        order
            .into_iter()
            .map(|o| {
                (
                    o,
                    self.results.iter().filter(|r| r.outcome == o).collect(),
                )
            })
            .filter(|(_, v)| !v.is_empty())
            .collect()
    }
}
