use serde::{Deserialize, Serialize};

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum HypervisorError {
    #[error("Failed to build HTTP client")]
    ClientBuild,

    #[error("Failed to authenticate to '{endpoint}': {detail}")]
    Authenticate { endpoint: String, detail: String },

    #[error("Request to '{path}' failed: {detail}")]
    Request { path: String, detail: String },

    #[error("Request to '{path}' failed with status {status}: {body}")]
    HttpStatus {
        path: String,
        status: u16,
        body: String,
    },

    #[error("Failed to parse response body from '{path}': {detail}")]
    ParseResponse { path: String, detail: String },

    #[error("Timed out waiting for task '{upid}' after {waited_secs}s")]
    TaskTimeout { upid: String, waited_secs: u64 },

    #[error("Task '{upid}' finished with non-OK exit status '{exitstatus}'")]
    TaskFailed { upid: String, exitstatus: String },

    #[error("Response from '{path}' did not contain the expected '{field}' field")]
    MissingField { path: String, field: &'static str },
}
