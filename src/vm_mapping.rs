//! Maps inventory host names to hypervisor-managed VMs (node + VMID), loaded from a TOML
//! `[vms.<host>]` table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fleetpatch_api::error::{ConfigError, FleetPatchError, ReportError};
use fleetpatch_api::model::VmMapping;
use log::warn;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct VmMappingFile {
    #[serde(default)]
    vms: HashMap<String, toml::Value>,
}

/// Looks for the VM mapping file at an explicit path, falling back to `./vm_mapping.toml` and
/// then `~/.fleetpatch/vm_mapping.toml`. Returns `None` if none exist, which disables VM
/// operations fleet-wide rather than failing the whole run.
pub fn find_mapping_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let current = PathBuf::from("vm_mapping.toml");
    if current.exists() {
        return Some(current);
    }

    if let Some(home) = dirs_home() {
        let home_mapping = home.join(".fleetpatch").join("vm_mapping.toml");
        if home_mapping.exists() {
            return Some(home_mapping);
        }
    }

    None
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Loads VM mappings from `path`. Entries missing `node`/`vmid`, with a non-integer `vmid`, or
/// with a negative `max_snapshots` are logged and skipped rather than failing the whole load,
/// matching `vm_mapping.py`'s `_load_mappings`.
pub fn load(path: &Path) -> Result<HashMap<String, VmMapping>, FleetPatchError> {
    let contents = std::fs::read_to_string(path).structured(ConfigError::ReadVmMapping {
        path: path.display().to_string(),
    })?;
    let file: VmMappingFile = toml::from_str(&contents).structured(ConfigError::ParseVmMapping {
        path: path.display().to_string(),
    })?;

    let mappings = file
        .vms
        .into_iter()
        .filter_map(|(host, value)| parse_entry(&host, value).map(|mapping| (host, mapping)))
        .collect();

    Ok(mappings)
}

fn parse_entry(host: &str, value: toml::Value) -> Option<VmMapping> {
    let Some(table) = value.as_table() else {
        warn!("Invalid VM mapping for {host}: not a table");
        return None;
    };

    let node = table.get("node").and_then(toml::Value::as_str);
    let vmid = table.get("vmid");

    let (Some(node), Some(vmid_value)) = (node, vmid) else {
        warn!(
            "Incomplete VM mapping for {host}: missing node ({:?}) or vmid ({:?})",
            node, vmid
        );
        return None;
    };

    let Some(vmid) = vmid_value.as_integer().and_then(|v| u32::try_from(v).ok()) else {
        warn!("Invalid vmid for {host}: {vmid_value:?}");
        return None;
    };

    let max_snapshots = match table.get("max_snapshots") {
        None => None,
        Some(raw) => match raw.as_integer() {
            Some(n) if n >= 0 => Some(n as u32),
            Some(_) => {
                warn!("Invalid max_snapshots for {host}: must be >= 0");
                None
            }
            None => {
                warn!("Invalid max_snapshots for {host}: {raw:?}");
                None
            }
        },
    };

    let endpoint = table.get("endpoint").and_then(toml::Value::as_str).map(str::to_string);
    let username = table.get("username").and_then(toml::Value::as_str).map(str::to_string);
    let password = table.get("password").and_then(toml::Value::as_str).map(str::to_string);

    Some(VmMapping {
        host: host.to_string(),
        node: node.to_string(),
        vmid,
        max_snapshots,
        endpoint,
        username,
        password,
    })
}
