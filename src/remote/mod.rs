pub mod shell;

pub use shell::{CommandOutput, RemoteShell, Shell, ShellConnector, SshConnector};
