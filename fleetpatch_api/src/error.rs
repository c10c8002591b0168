use std::fmt::{Debug, Display, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

/// fleetpatch failed to load or validate its configuration or inventory.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}'")]
    ReadConfig { path: String },
    #[error("Failed to parse configuration file '{path}'")]
    ParseConfig { path: String },
    #[error("Configuration is missing required section '{section}'")]
    MissingSection { section: &'static str },
    #[error("Failed to read inventory file '{path}'")]
    ReadInventory { path: String },
    #[error("Failed to parse inventory file '{path}'")]
    ParseInventory { path: String },
    #[error("Inventory host '{host}' has no resolvable address")]
    UnresolvableHost { host: String },
    #[error("Inventory file '{path}' contains no hosts")]
    EmptyInventory { path: String },
    #[error("Failed to read VM mapping file '{path}'")]
    ReadVmMapping { path: String },
    #[error("Failed to parse VM mapping file '{path}'")]
    ParseVmMapping { path: String },
    #[error("No VM mapping entry for host '{host}'")]
    MissingVmMapping { host: String },
    #[error("Failed to write example file '{path}'")]
    WriteExample { path: String },
}

/// fleetpatch could not reach or authenticate to a host over SSH.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectError {
    #[error("Failed to resolve address for host '{host}'")]
    ResolveAddress { host: String },
    #[error("Failed to establish TCP connection to '{host}:{port}'")]
    Tcp { host: String, port: u16 },
    #[error("SSH handshake failed with host '{host}'")]
    Handshake { host: String },
    #[error("No usable authentication method succeeded for host '{host}'")]
    Authentication { host: String },
    #[error("SSH session to '{host}' timed out")]
    Timeout { host: String },
    #[error("Command execution over SSH failed on host '{host}'")]
    Exec { host: String },
}

/// fleetpatch failed to determine a host's operating system or package manager.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeError {
    #[error("Could not read /etc/os-release or lsb_release output on host '{host}'")]
    UnreadableOsRelease { host: String },
    #[error("Operating system on host '{host}' did not match any known distribution")]
    UnrecognizedDistribution { host: String },
    #[error("Host '{host}' reachability probe failed after reboot")]
    Unreachable { host: String },
}

/// A package manager adapter failed to run or parse a command.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum PackageManagerError {
    #[error("{manager} is not installed on host '{host}'")]
    NotInstalled { manager: &'static str, host: String },
    #[error("{manager} failed to refresh the package cache on host '{host}'")]
    RefreshCache { manager: &'static str, host: String },
    #[error("{manager} failed to list available updates on host '{host}'")]
    CheckUpdates { manager: &'static str, host: String },
    #[error("{manager} failed to apply updates on host '{host}'")]
    ApplyUpdates { manager: &'static str, host: String },
    #[error("Failed to parse {manager} output on host '{host}'")]
    ParseOutput { manager: &'static str, host: String },
    #[error("Host '{host}' requires a reboot to finish applying updates")]
    RebootRequired { host: String },
}

/// fleetpatch failed to snapshot, roll back, or power-cycle a VM through the hypervisor API.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum HypervisorError {
    #[error("Failed to authenticate to hypervisor endpoint '{endpoint}'")]
    Authenticate { endpoint: String },
    #[error("Hypervisor ticket for '{endpoint}' expired and could not be renewed")]
    TicketExpired { endpoint: String },
    #[error("Hypervisor request to '{path}' failed")]
    Request { path: String },
    #[error("Hypervisor returned an error response for '{path}': {message}")]
    Api { path: String, message: String },
    #[error("Timed out waiting for hypervisor task '{upid}' to complete")]
    TaskTimeout { upid: String },
    #[error("Hypervisor task '{upid}' finished with a non-OK status")]
    TaskFailed { upid: String },
    #[error("No snapshot named '{snapshot}' exists for VM {vmid}")]
    SnapshotNotFound { vmid: u32, snapshot: String },
}

/// fleetpatch could not render or deliver the end-of-run report.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ReportingError {
    #[error("Failed to render report body")]
    Render,
    #[error("Invalid email address '{address}'")]
    InvalidAddress { address: String },
    #[error("Failed to connect to SMTP relay '{relay}'")]
    SmtpConnect { relay: String },
    #[error("Failed to send report email")]
    SmtpSend,
}

/// An uncategorized error occurred or a bug was encountered. This indicates a problem with
/// fleetpatch itself rather than with a managed host.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
    #[error("Not yet implemented: {0}")]
    Todo(&'static str),
    #[error("Dispatcher thread pool failed to build")]
    ThreadPool,
}

/// Each variant of `ErrorKind` corresponds to a different category of error. The categories are
/// intended to be user-meaningful and to line up with the phase of a run that failed.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, IntoStaticStr, PartialEq)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    PackageManager(#[from] PackageManagerError),

    #[error(transparent)]
    Hypervisor(#[from] HypervisorError),

    #[error(transparent)]
    Report(#[from] ReportingError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct FleetPatchErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

/// The error type returned by every fallible operation in fleetpatch. Carries a structured
/// [`ErrorKind`] for machine consumption plus a human-facing context chain and the call site
/// that raised it.
pub struct FleetPatchError(Box<FleetPatchErrorInner>);

impl FleetPatchError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        FleetPatchError(Box::new(FleetPatchErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    #[track_caller]
    pub fn secondary_error_context(mut self, secondary: FleetPatchError) -> Self {
        self.0.context.push((
            format!(
                "While handling the error, an additional error was caught: \n\n{secondary:?}\n\nThe earlier error:"
            )
            .into(),
            Location::caller(),
        ));
        self
    }

    pub fn unstructured(self, context: impl Into<Cow<'static, str>>) -> anyhow::Error {
        match self.0.source {
            Some(source) => source.context(self.0.kind).context(context.into()),
            None => anyhow::Error::from(self.0.kind).context(context.into()),
        }
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured FleetPatchError.
    fn structured(self, kind: K) -> Result<T, FleetPatchError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, FleetPatchError> {
        match self {
            Some(t) => Ok(t),
            None => Err(FleetPatchError(Box::new(FleetPatchErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: None,
                context: Vec::new(),
            }))),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, FleetPatchError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(FleetPatchError(Box::new(FleetPatchErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait FleetPatchResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, FleetPatchError>;

    /// Convert the error into an unstructured error.
    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error>;
}

impl<T> FleetPatchResultExt<T> for Result<T, FleetPatchError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, FleetPatchError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }

    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error> {
        self.map_err(|e| e.unstructured(context))
    }
}

impl Serialize for FleetPatchError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("fleetpatch-error", 4)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        state.serialize_field("error", &self.0.kind)?;
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        state.end()
    }
}

impl Display for FleetPatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.kind)
    }
}

impl Debug for FleetPatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use serde_json::Value;

    use super::*;

    #[test]
    fn test_error_serialize() {
        let e = FleetPatchError(Box::new(FleetPatchErrorInner {
            kind: ErrorKind::Config(ConfigError::MissingSection { section: "ssh" }),
            location: Location::caller(),
            source: Some(
                std::fs::read("/non-existant-file")
                    .context("failed to read file")
                    .unwrap_err(),
            ),
            context: Vec::new(),
        }));
        let v = serde_json::to_value(e).unwrap();
        assert_eq!(v["category"], Value::String("config".into()));
        assert_eq!(
            v["message"],
            Value::String("Configuration is missing required section 'ssh'".into())
        );
        assert!(v["location"].as_str().unwrap().contains("error.rs:"));
    }

    #[test]
    fn test_error_debug() {
        let error = Err::<(), _>(anyhow::anyhow!("z"))
            .context("x\ny")
            .structured(InternalError::Internal("w"))
            .unwrap_err();
        assert_eq!(
            format!("{:?}", error),
            format!(
                "Internal error: w at {}:{}\n\nCaused by:\n    0: x\n       y\n    1: z\n",
                error.0.location.file(),
                error.0.location.line(),
            ),
        );
    }
}
