//! Error types for test runs

use std::path::PathBuf;
use thiserror::Error;

use crate::adapter::AdapterError;
use crate::orchestrator::RunPhase;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Server not ready after {timeout_ms} ms (waiting for '{marker}')")]
    ProvisionTimeout { marker: String, timeout_ms: u64 },

    #[error("Only {connected}/{expected} clients connected within {timeout_ms} ms")]
    ClientConnectTimeout {
        connected: usize,
        expected: usize,
        timeout_ms: u64,
    },

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Bridge disconnected: {0}")]
    BridgeDisconnect(String),

    #[error("Drain timed out after {timeout_ms} ms with {incomplete} incomplete client(s)")]
    DrainTimeout { incomplete: usize, timeout_ms: u64 },

    #[error("Export to {path} failed: {reason}")]
    Export { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Subject error: {0}")]
    Supervisor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rtbench_common::Error> for HarnessError {
    fn from(e: rtbench_common::Error) -> Self {
        match e {
            rtbench_common::Error::InvalidConfig(msg) => HarnessError::Configuration(msg),
            rtbench_common::Error::Io(e) => HarnessError::Io(e),
            rtbench_common::Error::Serialization(e) => HarnessError::Json(e),
        }
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// A run-level failure, tagged with the phase it surfaced in
#[derive(Error, Debug)]
#[error("run {run_index} failed during {phase}: {source}")]
pub struct RunError {
    pub phase: RunPhase,
    pub run_index: u32,
    #[source]
    pub source: HarnessError,
}
