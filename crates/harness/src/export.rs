//! Result files
//!
//! Results are written as pretty-printed JSON so two runs can be diffed
//! directly.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

use rtbench_common::{AggregateResult, TestConfiguration};

use crate::error::{HarnessError, HarnessResult};

/// Machine the results were measured on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub hostname: Option<String>,
    pub os: Option<String>,
    pub cpu_brand: Option<String>,
    pub cpu_cores: usize,
    pub total_memory_bytes: u64,
}

impl HostInfo {
    pub fn collect() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();

        Self {
            hostname: System::host_name(),
            os: System::long_os_version(),
            cpu_brand: system
                .cpus()
                .first()
                .map(|cpu| cpu.brand().trim().to_string())
                .filter(|brand| !brand.is_empty()),
            cpu_cores: system.cpus().len(),
            total_memory_bytes: system.total_memory(),
        }
    }
}

/// Aggregate result file of one configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFile {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub host: HostInfo,
    pub config: TestConfiguration,
    pub aggregate: AggregateResult,
}

impl ResultFile {
    pub fn new(config: &TestConfiguration, aggregate: AggregateResult) -> Self {
        Self {
            version: crate::VERSION.to_string(),
            generated_at: Utc::now(),
            host: HostInfo::collect(),
            config: config.clone(),
            aggregate,
        }
    }
}

pub struct ResultExporter;

impl ResultExporter {
    /// Serialize `value` to `path`, creating parent directories
    pub fn write<T: Serialize>(path: &Path, value: &T) -> HarnessResult<()> {
        let export_error = |reason: String| HarnessError::Export {
            path: path.to_path_buf(),
            reason,
        };

        let json = serde_json::to_string_pretty(value).map_err(|e| export_error(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| export_error(e.to_string()))?;
        }
        std::fs::write(path, json).map_err(|e| export_error(e.to_string()))?;

        info!(path = %path.display(), "Results written");
        Ok(())
    }

    pub fn load<T: DeserializeOwned>(path: &Path) -> HarnessResult<T> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the aggregate of `config` to `config.output`
    pub fn write_aggregate(
        config: &TestConfiguration,
        aggregate: &AggregateResult,
    ) -> HarnessResult<ResultFile> {
        let file = ResultFile::new(config, aggregate.clone());
        Self::write(&config.output, &file)?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(output: PathBuf) -> TestConfiguration {
        TestConfiguration {
            protocol: "sse".into(),
            clients: 2,
            messages: 5,
            payload_bytes: 8,
            repetitions: 1,
            output,
        }
    }

    #[test]
    fn test_write_aggregate_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results/nested/sse.json");
        let config = config(path.clone());
        let aggregate = AggregateResult::from_runs(&config, Vec::new());

        let written = ResultExporter::write_aggregate(&config, &aggregate).unwrap();
        let loaded: ResultFile = ResultExporter::load(&path).unwrap();

        assert_eq!(loaded, written);
        assert_eq!(loaded.version, crate::VERSION);
        assert!(loaded.host.cpu_cores > 0 || loaded.host.cpu_brand.is_none());
    }

    #[test]
    fn test_unwritable_path_is_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let err = ResultExporter::write(&blocker.join("out.json"), &42).unwrap_err();
        assert!(matches!(err, HarnessError::Export { .. }));
    }
}
