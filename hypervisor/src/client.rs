//! Authenticated REST client for a Proxmox-VE-like hypervisor API: VM
//! snapshot create/delete/rollback/list, VM start/reboot, and UPID task
//! polling.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::{Duration, Instant},
};

use log::{debug, info, trace, warn};
use reqwest::{blocking::Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::error::HypervisorError;

/// Additional retry attempts made for a request that hits a retriable HTTP
/// status. 5 additional attempts means at most 6 attempts total.
const MAX_RETRIES: u8 = 5;

/// Statuses considered transient and worth retrying, matching the
/// `status_forcelist` used by the original client's `urllib3.Retry`.
const RETRIABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

#[derive(Debug, Clone)]
struct AuthTicket {
    ticket: String,
    csrf_token: String,
}

/// A snapshot as reported by `GET /nodes/{node}/qemu/{vmid}/snapshot`.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub snaptime: Option<i64>,
}

/// The subset of `HypervisorClient` the orchestrator drives: snapshot lifecycle and task
/// polling. Lets the orchestrator's state machine be tested against a fake hypervisor without
/// an HTTP server.
pub trait HypervisorApi {
    fn create_snapshot(
        &self,
        node: &str,
        vmid: u32,
        name: &str,
        description: &str,
        include_ram: bool,
    ) -> Result<String, HypervisorError>;

    fn delete_snapshot(&self, node: &str, vmid: u32, name: &str) -> Result<String, HypervisorError>;

    fn rollback_snapshot(&self, node: &str, vmid: u32, name: &str) -> Result<String, HypervisorError>;

    fn list_snapshots(&self, node: &str, vmid: u32) -> Result<Vec<SnapshotInfo>, HypervisorError>;

    fn wait_for_task(&self, node: &str, upid: &str, timeout: Duration) -> Result<(), HypervisorError>;

    fn reboot_vm(&self, node: &str, vmid: u32, timeout: Duration) -> Result<(), HypervisorError>;
}

pub struct HypervisorClient {
    endpoint: String,
    username: String,
    password: String,
    http: Client,
    ticket: RwLock<Option<AuthTicket>>,
}

impl HypervisorClient {
    pub fn new(endpoint: &str, username: &str, password: &str, verify_ssl: bool) -> Result<Self, HypervisorError> {
        let http = Client::builder()
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(|_| HypervisorError::ClientBuild)?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            username: username.to_string(),
            password: password.to_string(),
            http,
            ticket: RwLock::new(None),
        })
    }

    /// Authenticates against `/api2/json/access/ticket` and caches the
    /// resulting ticket/CSRF token. Always takes the exclusive lock, so
    /// callers racing to re-authenticate after a 401 serialize here and only
    /// one of them actually issues the request.
    fn authenticate(&self) -> Result<AuthTicket, HypervisorError> {
        let mut guard = self.ticket.write().expect("hypervisor ticket lock poisoned");

        let url = format!("{}/api2/json/access/ticket", self.endpoint);
        let mut form = HashMap::new();
        form.insert("username", self.username.as_str());
        form.insert("password", self.password.as_str());

        debug!("Authenticating to hypervisor endpoint '{}'", self.endpoint);
        let response = self
            .http
            .post(&url)
            .form(&form)
            .send()
            .map_err(|e| HypervisorError::Authenticate {
                endpoint: self.endpoint.clone(),
                detail: e.to_string(),
            })?;

        if response.status() != StatusCode::OK {
            return Err(HypervisorError::Authenticate {
                endpoint: self.endpoint.clone(),
                detail: format!("status {}", response.status()),
            });
        }

        let body: Value = response
            .json()
            .map_err(|e| HypervisorError::Authenticate {
                endpoint: self.endpoint.clone(),
                detail: e.to_string(),
            })?;

        let data = &body["data"];
        let ticket = AuthTicket {
            ticket: data["ticket"]
                .as_str()
                .ok_or(HypervisorError::MissingField {
                    path: "/access/ticket".into(),
                    field: "ticket",
                })?
                .to_string(),
            csrf_token: data["CSRFPreventionToken"]
                .as_str()
                .ok_or(HypervisorError::MissingField {
                    path: "/access/ticket".into(),
                    field: "CSRFPreventionToken",
                })?
                .to_string(),
        };

        info!("Authenticated to hypervisor at '{}'", self.endpoint);
        *guard = Some(ticket.clone());
        Ok(ticket)
    }

    fn cached_ticket(&self) -> Option<AuthTicket> {
        self.ticket
            .read()
            .expect("hypervisor ticket lock poisoned")
            .clone()
    }

    /// Issues one authenticated request, retrying transient HTTP statuses
    /// with exponential backoff (0.5s, 1s, 2s, 4s, 8s, capped at 16s) and
    /// transparently re-authenticating exactly once on a 401.
    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        form: Option<&HashMap<&str, String>>,
    ) -> Result<Value, HypervisorError> {
        let mut ticket = match self.cached_ticket() {
            Some(t) => t,
            None => self.authenticate()?,
        };

        let url = format!("{}/api2/json{}", self.endpoint, path);
        let mut reauthenticated = false;
        let mut attempt = 0u8;

        loop {
            trace!("{} {}", method, url);
            let mut req = self
                .http
                .request(method.clone(), &url)
                .header("CSRFPreventionToken", &ticket.csrf_token)
                .header("Cookie", format!("PVEAuthCookie={}", ticket.ticket));
            if let Some(form) = form {
                req = req.form(form);
            }

            let result = req.send();

            let response = match result {
                Ok(r) => r,
                Err(e) => {
                    return Err(HypervisorError::Request {
                        path: path.to_string(),
                        detail: e.to_string(),
                    })
                }
            };

            let status = response.status();

            if status == StatusCode::UNAUTHORIZED && !reauthenticated {
                warn!("Hypervisor ticket expired, re-authenticating once");
                reauthenticated = true;
                ticket = self.authenticate()?;
                continue;
            }

            if RETRIABLE_STATUSES.contains(&status.as_u16()) {
                if attempt >= MAX_RETRIES {
                    let body = response.text().unwrap_or_default();
                    return Err(HypervisorError::HttpStatus {
                        path: path.to_string(),
                        status: status.as_u16(),
                        body,
                    });
                }
                attempt += 1;
                let backoff = Duration::from_millis(match attempt {
                    1 => 500,
                    2 => 1000,
                    3 => 2000,
                    4 => 4000,
                    5 => 8000,
                    _ => 16000,
                });
                warn!(
                    "Hypervisor request to '{}' got status {}, retrying in {:.1}s",
                    path,
                    status,
                    backoff.as_secs_f32()
                );
                std::thread::sleep(backoff);
                continue;
            }

            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(HypervisorError::HttpStatus {
                    path: path.to_string(),
                    status: status.as_u16(),
                    body,
                });
            }

            return response.json().map_err(|e| HypervisorError::ParseResponse {
                path: path.to_string(),
                detail: e.to_string(),
            });
        }
    }

    fn get(&self, path: &str) -> Result<Value, HypervisorError> {
        self.request(reqwest::Method::GET, path, None)
    }

    fn post(
        &self,
        path: &str,
        form: HashMap<&str, String>,
    ) -> Result<Value, HypervisorError> {
        self.request(reqwest::Method::POST, path, Some(&form))
    }

    fn delete(&self, path: &str) -> Result<Value, HypervisorError> {
        self.request(reqwest::Method::DELETE, path, None)
    }

    fn data_str(path: &str, body: &Value, field: &'static str) -> Result<String, HypervisorError> {
        body["data"]
            .as_str()
            .map(str::to_string)
            .ok_or(HypervisorError::MissingField {
                path: path.to_string(),
                field,
            })
    }

    /// Creates a VM snapshot and returns the UPID of the resulting task.
    pub fn create_snapshot(
        &self,
        node: &str,
        vmid: u32,
        name: &str,
        description: &str,
        include_ram: bool,
    ) -> Result<String, HypervisorError> {
        let path = format!("/nodes/{node}/qemu/{vmid}/snapshot");
        let mut form = HashMap::new();
        form.insert("snapname", name.to_string());
        form.insert("description", description.to_string());
        form.insert("vmstate", if include_ram { "1" } else { "0" }.to_string());
        info!("Creating snapshot '{name}' for VM {vmid} on node {node}");
        let body = self.post(&path, form)?;
        Self::data_str(&path, &body, "upid")
    }

    /// Deletes a VM snapshot and returns the UPID of the resulting task.
    pub fn delete_snapshot(
        &self,
        node: &str,
        vmid: u32,
        name: &str,
    ) -> Result<String, HypervisorError> {
        let path = format!("/nodes/{node}/qemu/{vmid}/snapshot/{name}");
        info!("Deleting snapshot '{name}' for VM {vmid} on node {node}");
        let body = self.delete(&path)?;
        Self::data_str(&path, &body, "upid")
    }

    /// Rolls a VM back to a snapshot and returns the UPID of the resulting
    /// task.
    pub fn rollback_snapshot(
        &self,
        node: &str,
        vmid: u32,
        name: &str,
    ) -> Result<String, HypervisorError> {
        let path = format!("/nodes/{node}/qemu/{vmid}/snapshot/{name}/rollback");
        warn!("Rolling back VM {vmid} on node {node} to snapshot '{name}'");
        let body = self.post(&path, HashMap::new())?;
        Self::data_str(&path, &body, "upid")
    }

    /// Lists the snapshots of a VM.
    pub fn list_snapshots(
        &self,
        node: &str,
        vmid: u32,
    ) -> Result<Vec<SnapshotInfo>, HypervisorError> {
        let path = format!("/nodes/{node}/qemu/{vmid}/snapshot");
        let body = self.get(&path)?;
        serde_json::from_value(body["data"].clone()).map_err(|e| HypervisorError::ParseResponse {
            path,
            detail: e.to_string(),
        })
    }

    /// Polls `/nodes/{node}/tasks/{upid}/status` until the task stops,
    /// erroring on timeout or a non-OK exit status.
    pub fn wait_for_task(
        &self,
        node: &str,
        upid: &str,
        timeout: Duration,
    ) -> Result<(), HypervisorError> {
        let path = format!("/nodes/{node}/tasks/{upid}/status");
        let start = Instant::now();

        loop {
            if start.elapsed() >= timeout {
                return Err(HypervisorError::TaskTimeout {
                    upid: upid.to_string(),
                    waited_secs: timeout.as_secs(),
                });
            }

            match self.get(&path) {
                Ok(body) => {
                    let data = &body["data"];
                    if data["status"].as_str() == Some("stopped") {
                        let exitstatus = data["exitstatus"].as_str().unwrap_or("unknown");
                        if exitstatus == "OK" {
                            info!("Task '{upid}' completed successfully");
                            return Ok(());
                        }
                        return Err(HypervisorError::TaskFailed {
                            upid: upid.to_string(),
                            exitstatus: exitstatus.to_string(),
                        });
                    }
                }
                Err(e) => warn!("Error checking task '{upid}' status: {e}"),
            }

            std::thread::sleep(Duration::from_secs(2));
        }
    }

    /// Starts a VM, waiting for the resulting task if one is returned.
    pub fn start_vm(&self, node: &str, vmid: u32, timeout: Duration) -> Result<(), HypervisorError> {
        let path = format!("/nodes/{node}/qemu/{vmid}/status/start");
        info!("Starting VM {vmid} on node {node}");
        let body = self.post(&path, HashMap::new())?;
        if let Some(upid) = body["data"].as_str() {
            self.wait_for_task(node, upid, timeout)?;
        }
        Ok(())
    }

    /// Reboots a VM, waiting for the resulting task if one is returned.
    pub fn reboot_vm(
        &self,
        node: &str,
        vmid: u32,
        timeout: Duration,
    ) -> Result<(), HypervisorError> {
        let path = format!("/nodes/{node}/qemu/{vmid}/status/reboot");
        info!("Rebooting VM {vmid} on node {node}");
        let body = self.post(&path, HashMap::new())?;
        if let Some(upid) = body["data"].as_str() {
            self.wait_for_task(node, upid, timeout)?;
        }
        Ok(())
    }
}

impl HypervisorApi for HypervisorClient {
    fn create_snapshot(
        &self,
        node: &str,
        vmid: u32,
        name: &str,
        description: &str,
        include_ram: bool,
    ) -> Result<String, HypervisorError> {
        HypervisorClient::create_snapshot(self, node, vmid, name, description, include_ram)
    }

    fn delete_snapshot(&self, node: &str, vmid: u32, name: &str) -> Result<String, HypervisorError> {
        HypervisorClient::delete_snapshot(self, node, vmid, name)
    }

    fn rollback_snapshot(&self, node: &str, vmid: u32, name: &str) -> Result<String, HypervisorError> {
        HypervisorClient::rollback_snapshot(self, node, vmid, name)
    }

    fn list_snapshots(&self, node: &str, vmid: u32) -> Result<Vec<SnapshotInfo>, HypervisorError> {
        HypervisorClient::list_snapshots(self, node, vmid)
    }

    fn wait_for_task(&self, node: &str, upid: &str, timeout: Duration) -> Result<(), HypervisorError> {
        HypervisorClient::wait_for_task(self, node, upid, timeout)
    }

    fn reboot_vm(&self, node: &str, vmid: u32, timeout: Duration) -> Result<(), HypervisorError> {
        HypervisorClient::reboot_vm(self, node, vmid, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_auth(server: &mut mockito::ServerGuard) -> mockito::Mock {
        server
            .mock("POST", "/api2/json/access/ticket")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data": {"ticket": "PVE:root@pam:TICKET", "CSRFPreventionToken": "CSRF"}}"#,
            )
            .create()
    }

    #[test]
    fn test_create_snapshot() {
        let mut server = mockito::Server::new();
        let auth_mock = mock_auth(&mut server);
        let snap_mock = server
            .mock("POST", "/api2/json/nodes/pve1/qemu/100/snapshot")
            .with_status(200)
            .with_body(r#"{"data": "UPID:pve1:00000001::snapshot::100:root@pam:"}"#)
            .create();

        let client = HypervisorClient::new(&server.url(), "root@pam", "secret", true).unwrap();
        let upid = client
            .create_snapshot("pve1", 100, "pre-update-20260101-000000", "auto", false)
            .unwrap();
        assert_eq!(upid, "UPID:pve1:00000001::snapshot::100:root@pam:");

        auth_mock.assert();
        snap_mock.assert();
    }

    #[test]
    fn test_reauth_on_401() {
        let mut server = mockito::Server::new();
        let auth_mock = server
            .mock("POST", "/api2/json/access/ticket")
            .with_status(200)
            .with_body(
                r#"{"data": {"ticket": "PVE:root@pam:TICKET", "CSRFPreventionToken": "CSRF"}}"#,
            )
            .expect(2)
            .create();
        let unauthorized = server
            .mock("GET", "/api2/json/nodes/pve1/qemu/100/snapshot")
            .with_status(401)
            .expect(1)
            .create();
        let ok = server
            .mock("GET", "/api2/json/nodes/pve1/qemu/100/snapshot")
            .with_status(200)
            .with_body(r#"{"data": []}"#)
            .expect(1)
            .create();

        let client = HypervisorClient::new(&server.url(), "root@pam", "secret", true).unwrap();
        // Prime the cache so the first call to list_snapshots hits the 401.
        client.authenticate().unwrap();
        let snapshots = client.list_snapshots("pve1", 100).unwrap();
        assert!(snapshots.is_empty());

        auth_mock.assert();
        unauthorized.assert();
        ok.assert();
    }

    #[test]
    fn test_wait_for_task_success() {
        let mut server = mockito::Server::new();
        let auth_mock = mock_auth(&mut server);
        let status_mock = server
            .mock("GET", "/api2/json/nodes/pve1/tasks/UPID:xyz/status")
            .with_status(200)
            .with_body(r#"{"data": {"status": "stopped", "exitstatus": "OK"}}"#)
            .create();

        let client = HypervisorClient::new(&server.url(), "root@pam", "secret", true).unwrap();
        client.authenticate().unwrap();
        client
            .wait_for_task("pve1", "UPID:xyz", Duration::from_secs(5))
            .unwrap();

        auth_mock.assert();
        status_mock.assert();
    }

    #[test]
    fn test_wait_for_task_failed() {
        let mut server = mockito::Server::new();
        let auth_mock = mock_auth(&mut server);
        let status_mock = server
            .mock("GET", "/api2/json/nodes/pve1/tasks/UPID:xyz/status")
            .with_status(200)
            .with_body(r#"{"data": {"status": "stopped", "exitstatus": "snapshot failed"}}"#)
            .create();

        let client = HypervisorClient::new(&server.url(), "root@pam", "secret", true).unwrap();
        client.authenticate().unwrap();
        let err = client
            .wait_for_task("pve1", "UPID:xyz", Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, HypervisorError::TaskFailed { .. }));

        auth_mock.assert();
        status_mock.assert();
    }
}
