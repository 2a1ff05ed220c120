//! Protocol adapters
//!
//! An adapter is the only protocol-aware piece of a run. It describes the
//! server stack to start, the client code each browser page runs, and how
//! the server is asked to push messages. The orchestrator only ever talks
//! to `dyn ProtocolAdapter`.
//!
//! Client code talks back through `window.rtbench`, injected before the
//! adapter's source:
//!
//! ```text
//! rtbench.clientId, rtbench.endpoint, rtbench.messages
//! rtbench.connected()      once the transport is established
//! rtbench.message(seq)     for every received message
//! rtbench.error(message)   for client-side failures
//! rtbench.closed()         when the transport closes
//! ```

mod http;
mod polling;
mod pubsub;
mod socketio;
mod sse;
mod websocket;

pub use http::HttpTrigger;
pub use polling::PollingAdapter;
pub use pubsub::PubSubAdapter;
pub use socketio::SocketIoAdapter;
pub use sse::SseAdapter;
pub use websocket::WebSocketAdapter;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use rtbench_common::TestConfiguration;

use crate::config::{HarnessConfig, ProtocolSettings};
use crate::error::{HarnessError, HarnessResult};
use crate::supervisor::{ServerSpec, ServerSubject};

/// How an adapter delivers M messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    /// One trigger call carrying the full count
    Batched,
    /// One trigger call per message
    PerMessage,
}

impl std::fmt::Display for SendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendMode::Batched => write!(f, "batched"),
            SendMode::PerMessage => write!(f, "per-message"),
        }
    }
}

/// Body of one send trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSpec {
    /// Sequence number of the first message, starting at 1
    pub first_seq: u32,
    pub count: u32,
    pub payload_bytes: u32,
}

impl MessageSpec {
    /// Sequence numbers covered by this trigger
    pub fn seqs(&self) -> std::ops::RangeInclusive<u32> {
        self.first_seq..=self.first_seq + self.count.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendAck {
    pub accepted: u32,
}

/// What each browser page loads and runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientScript {
    /// Page to open; relative paths resolve against the server endpoint
    pub page_url: String,
    /// Scripts loaded before the client source
    pub dependencies: Vec<String>,
    pub source: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct AdapterError {
    pub reason: String,
}

impl AdapterError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        Self::new(e.to_string())
    }
}

#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// Protocol identifier, e.g. "websocket"
    fn protocol(&self) -> &str;

    fn send_mode(&self) -> SendMode;

    /// Describe the server stack for one run
    fn prepare_server(&self, config: &TestConfiguration) -> Result<ServerSpec, AdapterError>;

    /// Client code injected into every page
    fn prepare_client(&self, server: &ServerSubject) -> Result<ClientScript, AdapterError>;

    /// Ask the server to push `spec.count` messages
    async fn trigger_send(
        &self,
        server: &ServerSubject,
        spec: &MessageSpec,
    ) -> Result<SendAck, AdapterError>;

    async fn teardown(&self, _server: &ServerSubject) -> Result<(), AdapterError> {
        Ok(())
    }
}

/// The trigger calls of one Sending phase. Identical for every protocol
/// sharing a send mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPlan {
    calls: Vec<MessageSpec>,
}

impl SendPlan {
    pub fn new(config: &TestConfiguration, mode: SendMode) -> Self {
        let calls = match mode {
            SendMode::Batched => vec![MessageSpec {
                first_seq: 1,
                count: config.messages,
                payload_bytes: config.payload_bytes,
            }],
            SendMode::PerMessage => (1..=config.messages)
                .map(|seq| MessageSpec {
                    first_seq: seq,
                    count: 1,
                    payload_bytes: config.payload_bytes,
                })
                .collect(),
        };
        Self { calls }
    }

    pub fn calls(&self) -> &[MessageSpec] {
        &self.calls
    }

    /// Messages covered by all calls
    pub fn total(&self) -> u32 {
        self.calls.iter().map(|c| c.count).sum()
    }
}

/// Server spec shared by the built-in adapters
pub(crate) fn server_spec(
    protocol: &str,
    settings: &ProtocolSettings,
    config: &TestConfiguration,
) -> ServerSpec {
    let mut env = BTreeMap::new();
    env.insert("RTBENCH_CLIENTS".to_string(), config.clients.to_string());
    env.insert("RTBENCH_MESSAGES".to_string(), config.messages.to_string());
    env.insert("RTBENCH_PAYLOAD_BYTES".to_string(), config.payload_bytes.to_string());

    ServerSpec {
        protocol: protocol.to_string(),
        compose_file: settings.compose_file.clone(),
        project: settings.project.clone(),
        service: settings.service.clone(),
        readiness_marker: settings.readiness_marker.clone(),
        endpoint: settings.endpoint.clone(),
        env,
    }
}

/// `http://host:port` -> `ws://host:port`
pub(crate) fn websocket_url(endpoint: &str) -> String {
    if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        endpoint.to_string()
    }
}

/// Adapters by protocol identifier
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn ProtocolAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn ProtocolAdapter>) {
        self.adapters.insert(adapter.protocol().to_string(), adapter);
    }

    pub fn get(&self, protocol: &str) -> HarnessResult<Arc<dyn ProtocolAdapter>> {
        self.adapters.get(protocol).cloned().ok_or_else(|| {
            HarnessError::Configuration(format!(
                "unknown protocol '{}' (known: {})",
                protocol,
                self.protocols().join(", ")
            ))
        })
    }

    pub fn protocols(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProtocolAdapter>> {
        self.adapters.values()
    }

    /// Built-in adapters for every protocol configured in `config`
    pub fn from_config(config: &HarnessConfig) -> HarnessResult<Self> {
        let mut registry = Self::new();
        for (protocol, settings) in &config.protocols {
            let settings = settings.clone();
            let adapter: Arc<dyn ProtocolAdapter> = match protocol.as_str() {
                "polling" => Arc::new(PollingAdapter::new(settings)?),
                "sse" => Arc::new(SseAdapter::new(settings)?),
                "websocket" => Arc::new(WebSocketAdapter::new(settings)?),
                "socketio" => Arc::new(SocketIoAdapter::new(settings)?),
                "pubsub" => Arc::new(PubSubAdapter::new(settings)?),
                other => {
                    return Err(HarnessError::Configuration(format!(
                        "no adapter implements protocol '{}'",
                        other
                    )))
                }
            };
            registry.register(adapter);
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(messages: u32) -> TestConfiguration {
        TestConfiguration {
            protocol: "websocket".into(),
            clients: 4,
            messages,
            payload_bytes: 128,
            repetitions: 1,
            output: PathBuf::from("out.json"),
        }
    }

    #[test]
    fn test_batched_plan_is_single_call() {
        let plan = SendPlan::new(&config(1000), SendMode::Batched);
        assert_eq!(
            plan.calls(),
            &[MessageSpec {
                first_seq: 1,
                count: 1000,
                payload_bytes: 128
            }]
        );
        assert_eq!(plan.total(), 1000);
    }

    #[test]
    fn test_per_message_plan_covers_every_seq() {
        let plan = SendPlan::new(&config(5), SendMode::PerMessage);
        assert_eq!(plan.calls().len(), 5);
        let seqs: Vec<u32> = plan.calls().iter().flat_map(|c| c.seqs()).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(plan.total(), 5);
    }

    #[test]
    fn test_message_spec_wire_format() {
        let spec = MessageSpec {
            first_seq: 1,
            count: 10,
            payload_bytes: 64,
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"firstSeq":1,"count":10,"payloadBytes":64}"#);
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(websocket_url("http://127.0.0.1:8003"), "ws://127.0.0.1:8003");
        assert_eq!(websocket_url("https://bench.local"), "wss://bench.local");
        assert_eq!(websocket_url("ws://already"), "ws://already");
    }

    #[test]
    fn test_registry_from_default_config() {
        let registry = AdapterRegistry::from_config(&HarnessConfig::default()).unwrap();
        assert_eq!(
            registry.protocols(),
            vec!["polling", "pubsub", "socketio", "sse", "websocket"]
        );
        assert_eq!(
            registry.get("pubsub").unwrap().send_mode(),
            SendMode::PerMessage
        );
        assert_eq!(
            registry.get("sse").unwrap().send_mode(),
            SendMode::Batched
        );
    }

    #[test]
    fn test_registry_unknown_protocol() {
        let registry = AdapterRegistry::from_config(&HarnessConfig::default()).unwrap();
        assert!(matches!(
            registry.get("carrier-pigeon"),
            Err(HarnessError::Configuration(_))
        ));
    }

    #[test]
    fn test_registry_rejects_unimplemented_protocol() {
        let mut config = HarnessConfig::default();
        let settings = config.protocols["sse"].clone();
        config.protocols.insert("grpc".into(), settings);
        assert!(AdapterRegistry::from_config(&config).is_err());
    }

    #[test]
    fn test_server_spec_env() {
        let settings = ProtocolSettings::defaults()["websocket"].clone();
        let spec = server_spec("websocket", &settings, &config(10));
        assert_eq!(spec.env["RTBENCH_MESSAGES"], "10");
        assert_eq!(spec.env["RTBENCH_PAYLOAD_BYTES"], "128");
        assert_eq!(spec.endpoint, "http://127.0.0.1:8003");
    }
}
