pub mod client;
pub mod error;

pub use client::{HypervisorApi, HypervisorClient, SnapshotInfo};
pub use error::HypervisorError;
