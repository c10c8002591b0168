//! Configuration loading, grounded on `config.py`: a TOML document with `[email]`,
//! `[inventory]`, `[ssh]`, `[proxmox]` and `[updates]` sections. `email` and `inventory` are
//! required; the rest default to conservative, change-nothing values.

use std::path::{Path, PathBuf};

use fleetpatch_api::error::{ConfigError, FleetPatchError, ReportError};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub smtp_port: u16,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from_email: String,
    #[serde(deserialize_with = "one_or_many")]
    pub to_email: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => Ok(vec![s]),
        OneOrMany::Many(v) => Ok(v),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    pub path: String,
    #[serde(default)]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_ssh_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxmoxConfig {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    #[serde(default = "default_proxmox_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub vm_mapping_file: Option<PathBuf>,
}

fn default_proxmox_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatesConfig {
    #[serde(default)]
    pub apply_updates: bool,
    #[serde(default)]
    pub reboot_after_updates: bool,
    #[serde(default = "default_reboot_timeout")]
    pub reboot_timeout: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_snapshot_prefix")]
    pub snapshot_name_prefix: String,
    #[serde(default)]
    pub cleanup_snapshots: bool,
    #[serde(default = "default_retention_days")]
    pub snapshot_retention_days: u64,
    #[serde(default)]
    pub opt_out_hosts: Vec<String>,
}

fn default_reboot_timeout() -> u64 {
    300
}
fn default_ping_timeout() -> u64 {
    120
}
fn default_ping_interval() -> u64 {
    5
}
fn default_snapshot_prefix() -> String {
    "pre-update".to_string()
}
fn default_retention_days() -> u64 {
    7
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        UpdatesConfig {
            apply_updates: false,
            reboot_after_updates: false,
            reboot_timeout: default_reboot_timeout(),
            ping_timeout: default_ping_timeout(),
            ping_interval: default_ping_interval(),
            snapshot_name_prefix: default_snapshot_prefix(),
            cleanup_snapshots: false,
            snapshot_retention_days: default_retention_days(),
            opt_out_hosts: Vec::new(),
        }
    }
}

/// The fully loaded, validated configuration document.
#[derive(Debug, Clone)]
pub struct Config {
    pub path: PathBuf,
    pub email: EmailConfig,
    pub inventory: InventoryConfig,
    pub ssh: SshConfig,
    pub proxmox: Option<ProxmoxConfig>,
    pub updates: UpdatesConfig,
}

/// Finds the configuration file: an explicit path, then `./config.toml`, then
/// `~/.fleetpatch/config.toml`.
pub fn find_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let current = PathBuf::from("config.toml");
    if current.exists() {
        return current;
    }

    if let Some(home) = std::env::var_os("HOME") {
        let home_config = PathBuf::from(home).join(".fleetpatch").join("config.toml");
        if home_config.exists() {
            return home_config;
        }
    }

    current
}

/// Mirrors the on-disk document shape; `email` and `inventory` are the only sections without a
/// `Default` impl, so they're required.
#[derive(Debug, Deserialize)]
struct RawConfig {
    email: EmailConfig,
    inventory: InventoryConfig,
    #[serde(default)]
    ssh: SshConfig,
    #[serde(default)]
    proxmox: Option<ProxmoxConfig>,
    #[serde(default)]
    updates: UpdatesConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, FleetPatchError> {
        let contents = std::fs::read_to_string(path).structured(ConfigError::ReadConfig {
            path: path.display().to_string(),
        })?;
        let raw: RawConfig = toml::from_str(&contents).structured(ConfigError::ParseConfig {
            path: path.display().to_string(),
        })?;

        Ok(Config {
            path: path.to_path_buf(),
            email: raw.email,
            inventory: raw.inventory,
            ssh: raw.ssh,
            proxmox: raw.proxmox,
            updates: raw.updates,
        })
    }

    /// Resolves the inventory path: expands `$VARS` and `~`, then anchors relative paths to the
    /// directory the config file lives in.
    pub fn inventory_path(&self) -> PathBuf {
        let candidate = PathBuf::from(expand_path(&self.inventory.path));

        if candidate.is_absolute() {
            return candidate;
        }

        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(candidate),
            _ => candidate,
        }
    }
}

/// Expands `$VAR`-style environment references and a leading `~` the way `os.path.expandvars`
/// plus `os.path.expanduser` did in the original.
fn expand_path(raw: &str) -> String {
    let mut expanded = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            let mut var = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_alphanumeric() || next == '_' {
                    var.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if !var.is_empty() {
                expanded.push_str(&std::env::var(&var).unwrap_or_default());
                continue;
            }
        }
        expanded.push(c);
    }

    if let Some(rest) = expanded.strip_prefix('~') {
        if rest.is_empty() || rest.starts_with('/') {
            if let Some(home) = std::env::var_os("HOME") {
                return format!("{}{}", home.to_string_lossy(), rest);
            }
        }
    }

    expanded
}

