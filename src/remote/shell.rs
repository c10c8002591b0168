//! SSH remote command execution, grounded on `ssh_manager.py`'s connection/auth ladder: an
//! explicit key file, then the local SSH agent, then a plaintext password. Host keys are
//! accepted unconditionally, matching paramiko's `AutoAddPolicy` the original used.

use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

use fleetpatch_api::error::{ConnectError, FleetPatchError, ReportError};
use fleetpatch_api::model::Host;
use ssh2::Session;

use crate::config::SshConfig;

/// The outcome of a single remote command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An authenticated SSH session to a single host, kept open for the lifetime of one host's
/// update pass.
pub struct RemoteShell {
    session: Session,
    host_name: String,
}

impl RemoteShell {
    pub fn connect(host: &Host, ssh_config: &SshConfig, timeout: Duration) -> Result<Self, FleetPatchError> {
        let address = format!("{}:{}", host.address, host.port);
        let tcp = TcpStream::connect(&address).structured(ConnectError::Tcp {
            host: host.name.clone(),
            port: host.port,
        })?;
        tcp.set_read_timeout(Some(timeout)).ok();
        tcp.set_write_timeout(Some(timeout)).ok();

        let mut session = Session::new().structured(ConnectError::Handshake {
            host: host.name.clone(),
        })?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout.as_millis() as u32);
        session.handshake().structured(ConnectError::Handshake {
            host: host.name.clone(),
        })?;

        let username = host
            .username
            .clone()
            .or_else(|| ssh_config.username.clone())
            .unwrap_or_else(|| "root".to_string());

        Self::authenticate(&session, &username, ssh_config, host)?;

        Ok(RemoteShell {
            session,
            host_name: host.name.clone(),
        })
    }

    fn authenticate(
        session: &Session,
        username: &str,
        ssh_config: &SshConfig,
        host: &Host,
    ) -> Result<(), FleetPatchError> {
        if let Some(key_file) = &ssh_config.key_file {
            if key_file.exists() && session.userauth_pubkey_file(username, None, key_file, None).is_ok() {
                return Ok(());
            }
        }

        if session.userauth_agent(username).is_ok() {
            return Ok(());
        }

        if let Some(password) = &ssh_config.password {
            if session.userauth_password(username, password).is_ok() {
                return Ok(());
            }
        }

        Err(FleetPatchError::new(ConnectError::Authentication {
            host: host.name.clone(),
        }))
    }

    /// Runs `command` to completion and collects its exit status, stdout and stderr. `timeout`
    /// overrides the session-wide timeout set at `connect` for the duration of this one call, so
    /// each caller can apply its own per-operation deadline (`libssh2` has no separate per-channel
    /// timeout).
    pub fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput, FleetPatchError> {
        self.session.set_timeout(timeout.as_millis().try_into().unwrap_or(u32::MAX));

        let mut channel = self.session.channel_session().structured(ConnectError::Exec {
            host: self.host_name.clone(),
        })?;
        channel.exec(command).structured(ConnectError::Exec {
            host: self.host_name.clone(),
        })?;

        let mut stdout = String::new();
        channel.read_to_string(&mut stdout).ok();
        let mut stderr = String::new();
        channel.stderr().read_to_string(&mut stderr).ok();

        channel.wait_close().ok();
        let exit_code = channel.exit_status().unwrap_or(-1);

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }
}

/// A command channel to a single host. Lets package adapters and OS detection run against a
/// fake in tests instead of a live SSH session.
pub trait Shell {
    fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput, FleetPatchError>;
    fn host_name(&self) -> &str;
}

impl Shell for RemoteShell {
    fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput, FleetPatchError> {
        RemoteShell::exec(self, command, timeout)
    }

    fn host_name(&self) -> &str {
        RemoteShell::host_name(self)
    }
}

/// Opens a `Shell` to a host. Production code dials real SSH (`SshConnector`); orchestrator
/// tests substitute a fake that hands back canned `Shell` implementations without a network.
pub trait ShellConnector {
    fn connect(&self, host: &Host, timeout: Duration) -> Result<Box<dyn Shell>, FleetPatchError>;
}

pub struct SshConnector<'a> {
    pub ssh_config: &'a SshConfig,
}

impl<'a> ShellConnector for SshConnector<'a> {
    fn connect(&self, host: &Host, timeout: Duration) -> Result<Box<dyn Shell>, FleetPatchError> {
        RemoteShell::connect(host, self.ssh_config, timeout).map(|shell| Box::new(shell) as Box<dyn Shell>)
    }
}
