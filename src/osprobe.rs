//! Remote OS detection, grounded on `os_detector.py`: `uname -a`, `/etc/os-release` and
//! `lsb_release -a` are combined to determine family/distribution/version, then the package
//! manager is confirmed by checking for its binary with `test -x`.

use std::collections::HashMap;
use std::time::Duration;

use fleetpatch_api::error::{FleetPatchError, ProbeError};
use fleetpatch_api::model::{OsFamily, OsInfo, PackageManagerKind};
use sysdefs::{arch, os_family};

use crate::remote::Shell;

/// Detection probes are single short-lived commands (`uname`, `cat /etc/os-release`, `test -x`),
/// never the multi-minute package-manager operations in `packages/`.
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

pub fn detect(shell: &dyn Shell) -> Result<OsInfo, FleetPatchError> {
    let uname = uname_info(shell);
    let os_release = key_value_output(shell, "cat /etc/os-release 2>/dev/null || true", '=');
    let lsb = key_value_output(shell, "lsb_release -a 2>/dev/null || true", ':');

    let (mut distribution, mut version) = ("unknown".to_string(), "unknown".to_string());

    if let Some(id) = os_release.get("ID") {
        distribution = id.to_lowercase();
    } else if let Some(name) = os_release.get("NAME") {
        distribution = name.to_lowercase();
    }
    if let Some(v) = os_release.get("VERSION_ID") {
        version = v.clone();
    } else if let Some(v) = os_release.get("VERSION") {
        version = v.clone();
    }

    if distribution == "unknown" {
        if let Some(id) = lsb.get("Distributor ID") {
            distribution = id.to_lowercase();
        }
        if let Some(r) = lsb.get("Release") {
            version = r.clone();
        }
    }

    if distribution == "unknown" {
        let kernel_name = uname.get("kernel_name").map(|s| s.to_lowercase()).unwrap_or_default();
        match kernel_name.as_str() {
            "darwin" => {
                distribution = "macos".to_string();
                version = uname.get("kernel_release").cloned().unwrap_or_else(|| "unknown".to_string());
            }
            "freebsd" => {
                distribution = "freebsd".to_string();
                version = uname.get("kernel_release").cloned().unwrap_or_else(|| "unknown".to_string());
            }
            "openbsd" => {
                distribution = "openbsd".to_string();
                version = uname.get("kernel_release").cloned().unwrap_or_else(|| "unknown".to_string());
            }
            _ => {}
        }
    }

    let family = os_family::family_for(&distribution);
    let distribution = os_family::normalize_distribution(&distribution);
    if matches!(distribution.as_str(), "arch" | "manjaro") && version == "unknown" {
        version = "rolling".to_string();
    }

    if family == OsFamily::Unknown && distribution == "unknown" {
        return Err(FleetPatchError::new(ProbeError::UnreadableOsRelease {
            host: shell.host_name().to_string(),
        }));
    }

    let package_manager = detect_package_manager(shell, &distribution);
    let architecture = uname
        .get("machine")
        .map(|m| arch::normalize(m))
        .unwrap_or_else(|| "unknown".to_string());

    Ok(OsInfo {
        family,
        distribution,
        version,
        architecture,
        package_manager,
    })
}

fn uname_info(shell: &dyn Shell) -> HashMap<String, String> {
    let Ok(output) = shell.exec("uname -a", PROBE_TIMEOUT) else {
        return HashMap::new();
    };
    if !output.success() {
        return HashMap::new();
    }

    let parts: Vec<&str> = output.stdout.trim().split_whitespace().collect();
    let mut info = HashMap::new();
    let fields = ["kernel_name", "hostname", "kernel_release", "kernel_version", "machine"];
    for (field, value) in fields.iter().zip(parts.iter()) {
        info.insert(field.to_string(), value.to_string());
    }
    info
}

fn key_value_output(shell: &dyn Shell, command: &str, separator: char) -> HashMap<String, String> {
    let Ok(output) = shell.exec(command, PROBE_TIMEOUT) else {
        return HashMap::new();
    };
    if !output.success() || output.stdout.trim().is_empty() {
        return HashMap::new();
    }

    output
        .stdout
        .trim()
        .lines()
        .filter_map(|line| line.split_once(separator))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches(['"', '\'']).to_string()))
        .collect()
}

fn detect_package_manager(shell: &dyn Shell, distribution: &str) -> PackageManagerKind {
    if let Some(default_pm) = os_family::default_package_manager(distribution) {
        if package_manager_exists(shell, default_pm) {
            return default_pm;
        }
    }

    for &pm in os_family::all_package_managers() {
        if package_manager_exists(shell, pm) {
            return pm;
        }
    }

    PackageManagerKind::Unknown
}

fn package_manager_exists(shell: &dyn Shell, kind: PackageManagerKind) -> bool {
    os_family::candidate_paths(kind)
        .iter()
        .any(|path| matches!(shell.exec(&format!("test -x {path}"), PROBE_TIMEOUT), Ok(out) if out.success()))
}
