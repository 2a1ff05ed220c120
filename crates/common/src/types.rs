//! Core types for rtbench

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::stats::{MetricStats, RunSummary};

/// Client identifier, dense in `0..clients`
pub type ClientId = u32;

/// Identifier of a managed out-of-process subject
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The server subject of a run
    pub fn server() -> Self {
        Self("server".to_string())
    }

    /// The browser process hosting a slice of the clients
    pub fn browser(index: usize) -> Self {
        Self(format!("browser-{}", index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_server(&self) -> bool {
        self.0 == "server"
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One benchmark configuration: N clients each receiving M messages, R times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestConfiguration {
    /// Protocol identifier, e.g. "websocket"
    pub protocol: String,

    /// Number of concurrent clients (N)
    pub clients: u32,

    /// Messages delivered to every client (M)
    pub messages: u32,

    /// Payload size of a single message
    pub payload_bytes: u32,

    /// Number of repeated runs (R)
    pub repetitions: u32,

    /// Result file for the aggregate
    pub output: PathBuf,
}

impl TestConfiguration {
    /// Largest payload a single message may carry
    pub const MAX_PAYLOAD_BYTES: u32 = 1024 * 1024;

    /// Check the ranges that do not depend on harness settings
    pub fn validate(&self) -> Result<()> {
        if self.protocol.trim().is_empty() {
            return Err(Error::InvalidConfig("protocol must not be empty".into()));
        }
        if self.clients == 0 {
            return Err(Error::InvalidConfig("client count must be at least 1".into()));
        }
        if self.messages == 0 {
            return Err(Error::InvalidConfig("message count must be at least 1".into()));
        }
        if self.repetitions == 0 {
            return Err(Error::InvalidConfig("repetition count must be at least 1".into()));
        }
        if self.payload_bytes == 0 || self.payload_bytes > Self::MAX_PAYLOAD_BYTES {
            return Err(Error::InvalidConfig(format!(
                "payload size must be within 1..={} bytes, got {}",
                Self::MAX_PAYLOAD_BYTES,
                self.payload_bytes
            )));
        }
        if self.output.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("output path must not be empty".into()));
        }
        Ok(())
    }
}

/// A message observed by one client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub client_id: ClientId,
    pub seq: u32,
    pub received_at_ms: i64,
}

/// A single resource usage reading of one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub subject_id: SubjectId,
    pub timestamp_ms: i64,
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

/// First/last receipt of one client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientLatency {
    pub first_received_at_ms: i64,
    pub last_received_at_ms: i64,
    pub received: u32,
    pub last_seq: u32,
}

impl ClientLatency {
    pub fn new(event: &MessageEvent) -> Self {
        Self {
            first_received_at_ms: event.received_at_ms,
            last_received_at_ms: event.received_at_ms,
            received: 1,
            last_seq: event.seq,
        }
    }

    /// Record a later message. Returns false for a sequence number that is
    /// not strictly greater than the last one seen.
    pub fn observe(&mut self, event: &MessageEvent) -> bool {
        if event.seq <= self.last_seq {
            return false;
        }
        self.last_seq = event.seq;
        self.received += 1;
        self.last_received_at_ms = self.last_received_at_ms.max(event.received_at_ms);
        true
    }
}

/// Completion state of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Complete,
    Incomplete { reason: String },
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Complete => write!(f, "complete"),
            RunStatus::Incomplete { reason } => write!(f, "incomplete ({})", reason),
        }
    }
}

/// Outcome of one execution of a TestConfiguration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub run_index: u32,
    pub config: TestConfiguration,
    pub started_at_ms: i64,
    /// Reference point for time-to-first/last message
    pub send_started_at_ms: Option<i64>,
    pub per_client_latency: BTreeMap<ClientId, ClientLatency>,
    pub usage_series: BTreeMap<SubjectId, Vec<UsageSample>>,
    pub status: RunStatus,
    #[serde(default)]
    pub incomplete_clients: Vec<ClientId>,
    #[serde(default)]
    pub client_errors: u32,
    #[serde(default)]
    pub rejected_events: u32,
    #[serde(default)]
    pub phase_durations_ms: BTreeMap<String, u64>,
}

impl RunResult {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_run(self)
    }
}

/// Reduction of R repetitions of one configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub protocol: String,
    pub repetitions: u32,
    pub complete_runs: u32,
    pub incomplete_runs: u32,
    pub time_to_first_ms: Option<MetricStats>,
    pub time_to_last_ms: Option<MetricStats>,
    pub max_time_to_last_ms: Option<MetricStats>,
    pub server_cpu_percent: Option<MetricStats>,
    pub server_memory_bytes: Option<MetricStats>,
    pub client_cpu_percent: Option<MetricStats>,
    pub client_memory_bytes: Option<MetricStats>,
    pub runs: Vec<RunResult>,
}

impl AggregateResult {
    /// Reduce a finished repetition set. Incomplete runs are kept in `runs`
    /// but excluded from the statistics.
    pub fn from_runs(config: &TestConfiguration, runs: Vec<RunResult>) -> Self {
        let summaries: Vec<RunSummary> = runs
            .iter()
            .filter(|r| r.is_complete())
            .map(RunResult::summary)
            .collect();

        let reduce = |pick: fn(&RunSummary) -> Option<f64>| {
            let values: Vec<f64> = summaries.iter().filter_map(pick).collect();
            MetricStats::from_values(&values)
        };

        let complete_runs = summaries.len() as u32;
        Self {
            protocol: config.protocol.clone(),
            repetitions: config.repetitions,
            complete_runs,
            incomplete_runs: runs.len() as u32 - complete_runs,
            time_to_first_ms: reduce(|s| s.mean_time_to_first_ms),
            time_to_last_ms: reduce(|s| s.mean_time_to_last_ms),
            max_time_to_last_ms: reduce(|s| s.max_time_to_last_ms),
            server_cpu_percent: reduce(|s| s.server_cpu_mean),
            server_memory_bytes: reduce(|s| s.server_memory_peak),
            client_cpu_percent: reduce(|s| s.client_cpu_mean),
            client_memory_bytes: reduce(|s| s.client_memory_peak),
            runs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TestConfiguration {
        TestConfiguration {
            protocol: "websocket".into(),
            clients: 10,
            messages: 100,
            payload_bytes: 64,
            repetitions: 3,
            output: PathBuf::from("out/ws.json"),
        }
    }

    fn event(seq: u32, at: i64) -> MessageEvent {
        MessageEvent {
            client_id: 0,
            seq,
            received_at_ms: at,
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_counts() {
        let mut c = config();
        c.clients = 0;
        assert!(c.validate().is_err());

        let mut c = config();
        c.messages = 0;
        assert!(c.validate().is_err());

        let mut c = config();
        c.repetitions = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_payload() {
        let mut c = config();
        c.payload_bytes = TestConfiguration::MAX_PAYLOAD_BYTES + 1;
        assert!(matches!(c.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_client_latency_rejects_duplicates() {
        let mut latency = ClientLatency::new(&event(1, 100));
        assert!(latency.observe(&event(2, 110)));
        assert!(!latency.observe(&event(2, 120)));
        assert!(!latency.observe(&event(1, 130)));
        assert!(latency.observe(&event(5, 140)));

        assert_eq!(latency.received, 3);
        assert_eq!(latency.last_seq, 5);
        assert_eq!(latency.last_received_at_ms, 140);
    }

    #[test]
    fn test_client_latency_last_never_before_first() {
        let mut latency = ClientLatency::new(&event(1, 100));
        latency.observe(&event(2, 90));
        assert!(latency.last_received_at_ms >= latency.first_received_at_ms);
    }

    #[test]
    fn test_subject_id_display() {
        assert_eq!(SubjectId::server().to_string(), "server");
        assert_eq!(SubjectId::browser(3).as_str(), "browser-3");
        assert!(SubjectId::server().is_server());
        assert!(!SubjectId::browser(0).is_server());
    }

    #[test]
    fn test_run_status_serialization() {
        let json = serde_json::to_string(&RunStatus::Incomplete {
            reason: "drain timeout".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"incomplete","reason":"drain timeout"}"#);
    }
}
