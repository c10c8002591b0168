//! Ansible-style inventory parsing: YAML (modern `all.hosts`/`all.children.*.hosts` and legacy
//! group-keyed) and INI (`[group]` / `host[:port] key=value`).

use std::collections::BTreeMap;
use std::path::Path;

use fleetpatch_api::error::{ConfigError, FleetPatchError, ReportError};
use fleetpatch_api::model::Host;

pub fn parse(path: &Path) -> Result<Vec<Host>, FleetPatchError> {
    let contents = std::fs::read_to_string(path).structured(ConfigError::ReadInventory {
        path: path.display().to_string(),
    })?;

    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    );
    let is_ini = matches!(path.extension().and_then(|e| e.to_str()), Some("ini") | Some("cfg"))
        || path.extension().is_none()
        || matches!(path.file_name().and_then(|n| n.to_str()), Some("hosts") | Some("inventory"));

    if is_yaml {
        return parse_yaml(&contents, path);
    }
    if is_ini {
        return Ok(parse_ini(&contents));
    }
    parse_yaml(&contents, path).or_else(|_| Ok(parse_ini(&contents)))
}

fn parse_yaml(contents: &str, path: &Path) -> Result<Vec<Host>, FleetPatchError> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(contents).structured(ConfigError::ParseInventory {
            path: path.display().to_string(),
        })?;

    let mut hosts = Vec::new();
    let Some(mapping) = doc.as_mapping() else {
        return Ok(hosts);
    };

    if let Some(all) = mapping.get("all") {
        if let Some(hosts_section) = all.get("hosts") {
            hosts.extend(parse_yaml_hosts(hosts_section));
        }
        if let Some(children) = all.get("children").and_then(|c| c.as_mapping()) {
            for (_group, group_data) in children {
                if let Some(hosts_section) = group_data.get("hosts") {
                    hosts.extend(parse_yaml_hosts(hosts_section));
                }
            }
        }
    } else {
        for (_group, group_data) in mapping {
            if let Some(hosts_section) = group_data.get("hosts") {
                hosts.extend(parse_yaml_hosts(hosts_section));
            }
        }
    }

    Ok(hosts)
}

fn parse_yaml_hosts(hosts_data: &serde_yaml::Value) -> Vec<Host> {
    let Some(mapping) = hosts_data.as_mapping() else {
        return Vec::new();
    };

    mapping
        .iter()
        .map(|(name, host_vars)| {
            let name = name.as_str().unwrap_or_default().to_string();
            let empty = serde_yaml::Mapping::new();
            let vars_map = host_vars.as_mapping().unwrap_or(&empty);

            let address = vars_map
                .get("ansible_host")
                .and_then(|v| v.as_str())
                .unwrap_or(&name)
                .to_string();
            let port = vars_map
                .get("ansible_port")
                .and_then(|v| v.as_u64())
                .unwrap_or(22) as u16;
            let username = vars_map
                .get("ansible_user")
                .or_else(|| vars_map.get("ansible_ssh_user"))
                .and_then(|v| v.as_str())
                .map(str::to_string);

            let vars = vars_map
                .iter()
                .filter_map(|(k, v)| {
                    let k = k.as_str()?.to_string();
                    let v = yaml_scalar_to_string(v)?;
                    Some((k, v))
                })
                .collect::<BTreeMap<_, _>>();

            Host {
                name,
                address,
                port,
                username,
                vars,
            }
        })
        .collect()
}

fn yaml_scalar_to_string(v: &serde_yaml::Value) -> Option<String> {
    match v {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_ini(contents: &str) -> Vec<Host> {
    let mut hosts = Vec::new();
    let mut current_group: Option<String> = None;

    for raw_line in contents.lines() {
        let line = raw_line.trim();

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            current_group = Some(line[1..line.len() - 1].to_string());
            continue;
        }

        if current_group.as_deref().is_some_and(|g| g.contains(":vars")) {
            continue;
        }

        if let Some(host) = parse_ini_host_line(line) {
            hosts.push(host);
        }
    }

    hosts
}

fn parse_ini_host_line(line: &str) -> Option<Host> {
    let mut parts = line.split_whitespace();
    let host_part = parts.next()?;

    let vars: BTreeMap<String, String> = parts
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let (name, default_port) = match host_part.rsplit_once(':') {
        Some((h, p)) => match p.parse::<u16>() {
            Ok(port) => (h.to_string(), port),
            Err(_) => (host_part.to_string(), 22),
        },
        None => (host_part.to_string(), 22),
    };

    let address = vars.get("ansible_host").cloned().unwrap_or_else(|| name.clone());
    let port = vars
        .get("ansible_port")
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(default_port);
    let username = vars
        .get("ansible_user")
        .or_else(|| vars.get("ansible_ssh_user"))
        .cloned();

    Some(Host {
        name,
        address,
        port,
        username,
        vars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_modern_format() {
        let yaml = indoc::indoc! {"
            all:
              hosts:
                web1:
                  ansible_host: 192.168.1.10
                  ansible_user: ubuntu
                db1:
                  ansible_host: 192.168.1.20
                  ansible_port: 2222
              children:
                webservers:
                  hosts:
                    web2:
                      ansible_host: 192.168.1.11
        "};
        let hosts = parse_yaml(yaml, Path::new("inventory.yml")).unwrap();
        assert_eq!(hosts.len(), 3);
        let web1 = hosts.iter().find(|h| h.name == "web1").unwrap();
        assert_eq!(web1.address, "192.168.1.10");
        assert_eq!(web1.username.as_deref(), Some("ubuntu"));
        let db1 = hosts.iter().find(|h| h.name == "db1").unwrap();
        assert_eq!(db1.port, 2222);
    }

    #[test]
    fn test_parse_ini() {
        let ini = indoc::indoc! {"
            [webservers]
            web1 ansible_host=192.168.1.10 ansible_user=ubuntu
            web2:2222

            [webservers:vars]
            ansible_user=admin
        "};
        let hosts = parse_ini(ini);
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].address, "192.168.1.10");
        assert_eq!(hosts[1].port, 2222);
    }
}
