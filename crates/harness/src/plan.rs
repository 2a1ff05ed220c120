//! Declarative YAML test plans
//!
//! A plan runs several configurations from one file, typically the same
//! load against every protocol:
//!
//! ```yaml
//! name: baseline
//! output_dir: results
//! defaults:
//!   clients: 100
//!   messages: 1000
//!   repetitions: 10
//! runs:
//!   - protocol: websocket
//!   - protocol: sse
//!   - protocol: polling
//!     clients: 30
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use rtbench_common::TestConfiguration;

use crate::error::{HarnessError, HarnessResult};

/// A named set of configurations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestPlan {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Directory for result files without an explicit output
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub defaults: PlanDefaults,

    pub runs: Vec<PlanEntry>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

/// Values used by every entry that does not set its own
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanDefaults {
    pub clients: u32,
    pub messages: u32,
    pub payload_bytes: u32,
    pub repetitions: u32,
}

impl Default for PlanDefaults {
    fn default() -> Self {
        Self {
            clients: 100,
            messages: 1000,
            payload_bytes: 64,
            repetitions: 10,
        }
    }
}

/// One configuration of a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEntry {
    pub protocol: String,
    #[serde(default)]
    pub clients: Option<u32>,
    #[serde(default)]
    pub messages: Option<u32>,
    #[serde(default)]
    pub payload_bytes: Option<u32>,
    #[serde(default)]
    pub repetitions: Option<u32>,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl TestPlan {
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        let plan: Self = serde_yaml::from_str(yaml)?;
        if plan.runs.is_empty() {
            return Err(HarnessError::Configuration(format!(
                "test plan '{}' has no runs",
                plan.name
            )));
        }
        Ok(plan)
    }

    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load every plan in a directory tree, sorted by path
    pub fn load_all(dir: &Path) -> HarnessResult<Vec<Self>> {
        let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        paths.iter().map(|path| Self::load(path)).collect()
    }

    /// Entries with defaults applied
    pub fn configurations(&self) -> Vec<TestConfiguration> {
        self.runs
            .iter()
            .map(|entry| {
                let clients = entry.clients.unwrap_or(self.defaults.clients);
                let messages = entry.messages.unwrap_or(self.defaults.messages);
                let output = entry.output.clone().unwrap_or_else(|| {
                    self.output_dir.join(format!(
                        "{}-{}-{}x{}.json",
                        self.name, entry.protocol, clients, messages
                    ))
                });
                TestConfiguration {
                    protocol: entry.protocol.clone(),
                    clients,
                    messages,
                    payload_bytes: entry.payload_bytes.unwrap_or(self.defaults.payload_bytes),
                    repetitions: entry.repetitions.unwrap_or(self.defaults.repetitions),
                    output,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
name: baseline
output_dir: out
defaults:
  clients: 12
  messages: 50
runs:
  - protocol: websocket
  - protocol: polling
    clients: 6
    repetitions: 2
  - protocol: sse
    output: custom/sse.json
"#;

    #[test]
    fn test_configurations_apply_defaults() {
        let plan = TestPlan::from_yaml(PLAN).unwrap();
        let configs = plan.configurations();
        assert_eq!(configs.len(), 3);

        assert_eq!(configs[0].clients, 12);
        assert_eq!(configs[0].messages, 50);
        assert_eq!(configs[0].payload_bytes, 64);
        assert_eq!(configs[0].repetitions, 10);
        assert_eq!(
            configs[0].output,
            PathBuf::from("out/baseline-websocket-12x50.json")
        );

        assert_eq!(configs[1].clients, 6);
        assert_eq!(configs[1].repetitions, 2);
        assert_eq!(configs[2].output, PathBuf::from("custom/sse.json"));
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert!(matches!(
            TestPlan::from_yaml("name: empty\nruns: []\n"),
            Err(HarnessError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_all_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), PLAN.replace("baseline", "second")).unwrap();
        std::fs::write(dir.path().join("a.yml"), PLAN).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let plans = TestPlan::load_all(dir.path()).unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].name, "baseline");
        assert_eq!(plans[1].name, "second");
    }
}
