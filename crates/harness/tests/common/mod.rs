//! In-process fakes for orchestrator tests. Nothing here needs Docker,
//! Node or a browser.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use rtbench_common::{ClientId, MessageEvent, SubjectId, TestConfiguration};
use rtbench_harness::adapter::{
    AdapterError, AdapterRegistry, ClientScript, MessageSpec, ProtocolAdapter, SendAck, SendMode,
};
use rtbench_harness::bridge::{BridgeEvent, BridgeSender};
use rtbench_harness::monitor::{UsageProbe, UsageReading};
use rtbench_harness::supervisor::{
    BrowserBackend, BrowserLaunch, BrowserSubject, ContainerBackend, ServerSpec, ServerSubject,
};
use rtbench_harness::{HarnessConfig, HarnessError, HarnessResult, Orchestrator, RunPhase};

pub const SERVER_CPU: f64 = 25.0;
pub const SERVER_MEMORY: u64 = 64 * 1024 * 1024;
pub const BROWSER_CPU: f64 = 12.5;
pub const BROWSER_MEMORY: u64 = 32 * 1024 * 1024;

/// Failure injection and client misbehaviour
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub fail_provision: bool,
    /// Browser index whose launch fails
    pub fail_launch: Option<usize>,
    /// Clients that never report connected
    pub unconnected: Vec<ClientId>,
    /// Client that disconnects instead of connecting
    pub disconnect_on_launch: Option<ClientId>,
    /// Clients that never receive a message
    pub silent: Vec<ClientId>,
    /// Zero-based trigger call that fails
    pub fail_trigger_at: Option<usize>,
}

// ============================================================================
// Network: routes triggered messages to the clients of every live browser
// ============================================================================

type Delivery = (MessageSpec, Vec<ClientId>);

/// Each attached browser gets an ordered delivery queue, so per-message
/// triggers reach a client in sequence order.
#[derive(Clone, Default)]
pub struct FakeNetwork {
    browsers: Arc<Mutex<BTreeMap<SubjectId, mpsc::UnboundedSender<Delivery>>>>,
}

impl FakeNetwork {
    fn attach(&self, id: SubjectId, clients: Vec<ClientId>, events: BridgeSender) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        self.browsers.lock().insert(id, tx);

        tokio::spawn(async move {
            while let Some((spec, silent)) = rx.recv().await {
                for seq in spec.seqs() {
                    for client_id in clients.iter().filter(|c| !silent.contains(c)) {
                        let event = BridgeEvent::Message(MessageEvent {
                            client_id: *client_id,
                            seq,
                            received_at_ms: chrono::Utc::now().timestamp_millis(),
                        });
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
    }

    fn detach(&self, id: &SubjectId) {
        self.browsers.lock().remove(id);
    }

    fn deliver(&self, spec: MessageSpec, silent: Vec<ClientId>) {
        for queue in self.browsers.lock().values() {
            let _ = queue.send((spec, silent.clone()));
        }
    }
}

/// Records the run phase every teardown happened in
#[derive(Default)]
pub struct PhaseLog {
    phases: Mutex<Option<watch::Receiver<RunPhase>>>,
    stops: Mutex<Vec<RunPhase>>,
}

impl PhaseLog {
    pub fn follow(&self, phases: watch::Receiver<RunPhase>) {
        *self.phases.lock() = Some(phases);
    }

    fn record(&self) {
        if let Some(phases) = &*self.phases.lock() {
            let phase = *phases.borrow();
            self.stops.lock().push(phase);
        }
    }

    /// Phase of every stop call, in order
    pub fn stop_phases(&self) -> Vec<RunPhase> {
        self.stops.lock().clone()
    }
}

// ============================================================================
// Probes
// ============================================================================

pub struct FixedProbe {
    reading: UsageReading,
}

#[async_trait]
impl UsageProbe for FixedProbe {
    async fn sample(&mut self) -> HarnessResult<UsageReading> {
        Ok(self.reading)
    }
}

// ============================================================================
// Backends
// ============================================================================

#[derive(Default)]
pub struct FakeContainers {
    behavior: Behavior,
    starts: AtomicU32,
    stops: Mutex<BTreeMap<String, u32>>,
    pub phases: PhaseLog,
}

impl FakeContainers {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            ..Default::default()
        }
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Stop calls per compose project
    pub fn stops(&self) -> BTreeMap<String, u32> {
        self.stops.lock().clone()
    }
}

#[async_trait]
impl ContainerBackend for FakeContainers {
    async fn start(&self, spec: &ServerSpec, timeout: Duration) -> HarnessResult<ServerSubject> {
        if self.behavior.fail_provision {
            return Err(HarnessError::ProvisionTimeout {
                marker: spec.readiness_marker.clone(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(ServerSubject {
            id: SubjectId::server(),
            protocol: spec.protocol.clone(),
            project: spec.project.clone(),
            container: format!("{}-{}-1", spec.project, spec.service),
            readiness_marker: spec.readiness_marker.clone(),
            endpoint: spec.endpoint.clone(),
        })
    }

    async fn stop(&self, subject: &ServerSubject) -> HarnessResult<()> {
        self.phases.record();
        *self.stops.lock().entry(subject.project.clone()).or_insert(0) += 1;
        Ok(())
    }

    fn probe(&self, _subject: &ServerSubject) -> HarnessResult<Box<dyn UsageProbe>> {
        Ok(Box::new(FixedProbe {
            reading: UsageReading {
                cpu_percent: SERVER_CPU,
                memory_bytes: SERVER_MEMORY,
            },
        }))
    }
}

pub struct FakeBrowsers {
    behavior: Behavior,
    network: FakeNetwork,
    launches: Mutex<Vec<Vec<ClientId>>>,
    stops: Mutex<BTreeMap<SubjectId, u32>>,
    pub phases: PhaseLog,
}

impl FakeBrowsers {
    pub fn new(behavior: Behavior, network: FakeNetwork) -> Self {
        Self {
            behavior,
            network,
            launches: Mutex::new(Vec::new()),
            stops: Mutex::new(BTreeMap::new()),
            phases: PhaseLog::default(),
        }
    }

    /// Client slices of every successful launch
    pub fn launches(&self) -> Vec<Vec<ClientId>> {
        self.launches.lock().clone()
    }

    pub fn stops(&self) -> BTreeMap<SubjectId, u32> {
        self.stops.lock().clone()
    }
}

#[async_trait]
impl BrowserBackend for FakeBrowsers {
    async fn launch(&self, launch: BrowserLaunch) -> HarnessResult<BrowserSubject> {
        if self.behavior.fail_launch == Some(launch.index) {
            return Err(HarnessError::Supervisor(format!(
                "browser {} failed to start",
                launch.index
            )));
        }

        let id = SubjectId::browser(launch.index);
        let pid = 10_000 + launch.index as u32;
        self.launches.lock().push(launch.clients.clone());
        self.network
            .attach(id.clone(), launch.clients.clone(), launch.events.clone());

        let behavior = self.behavior.clone();
        let clients = launch.clients.clone();
        let events = launch.events;
        let index = launch.index;
        tokio::spawn(async move {
            let _ = events
                .send(BridgeEvent::Launched {
                    browser: index,
                    pid,
                })
                .await;
            for client_id in clients {
                let event = if behavior.disconnect_on_launch == Some(client_id) {
                    BridgeEvent::Disconnected { client_id }
                } else if behavior.unconnected.contains(&client_id) {
                    continue;
                } else {
                    BridgeEvent::Connected { client_id }
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
        });

        Ok(BrowserSubject {
            id,
            index: launch.index,
            pid: Some(pid),
            clients: launch.clients,
        })
    }

    async fn stop(&self, subject: &BrowserSubject) -> HarnessResult<()> {
        self.network.detach(&subject.id);
        self.phases.record();
        *self.stops.lock().entry(subject.id.clone()).or_insert(0) += 1;
        Ok(())
    }

    fn probe(&self, _subject: &BrowserSubject) -> HarnessResult<Box<dyn UsageProbe>> {
        Ok(Box::new(FixedProbe {
            reading: UsageReading {
                cpu_percent: BROWSER_CPU,
                memory_bytes: BROWSER_MEMORY,
            },
        }))
    }
}

// ============================================================================
// Adapter
// ============================================================================

pub struct FakeAdapter {
    protocol: String,
    mode: SendMode,
    behavior: Behavior,
    network: FakeNetwork,
    calls: Mutex<Vec<MessageSpec>>,
    teardowns: AtomicU32,
}

impl FakeAdapter {
    pub fn new(protocol: &str, mode: SendMode, behavior: Behavior, network: FakeNetwork) -> Self {
        Self {
            protocol: protocol.to_string(),
            mode,
            behavior,
            network,
            calls: Mutex::new(Vec::new()),
            teardowns: AtomicU32::new(0),
        }
    }

    /// Every trigger call, in order
    pub fn calls(&self) -> Vec<MessageSpec> {
        self.calls.lock().clone()
    }

    pub fn teardowns(&self) -> u32 {
        self.teardowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolAdapter for FakeAdapter {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn send_mode(&self) -> SendMode {
        self.mode
    }

    fn prepare_server(&self, config: &TestConfiguration) -> Result<ServerSpec, AdapterError> {
        Ok(ServerSpec {
            protocol: self.protocol.clone(),
            compose_file: PathBuf::from(format!("servers/{}/docker-compose.yml", self.protocol)),
            project: format!("rtbench-{}", self.protocol),
            service: "server".into(),
            readiness_marker: "listening".into(),
            endpoint: "http://127.0.0.1:9000".into(),
            env: BTreeMap::from([("RTBENCH_MESSAGES".to_string(), config.messages.to_string())]),
        })
    }

    fn prepare_client(&self, _server: &ServerSubject) -> Result<ClientScript, AdapterError> {
        Ok(ClientScript {
            page_url: "/".into(),
            dependencies: Vec::new(),
            source: "rtbench.connected();".into(),
        })
    }

    async fn trigger_send(
        &self,
        _server: &ServerSubject,
        spec: &MessageSpec,
    ) -> Result<SendAck, AdapterError> {
        let call = {
            let mut calls = self.calls.lock();
            calls.push(*spec);
            calls.len() - 1
        };
        if self.behavior.fail_trigger_at == Some(call) {
            return Err(AdapterError::new("injected trigger failure"));
        }
        self.network.deliver(*spec, self.behavior.silent.clone());
        Ok(SendAck {
            accepted: spec.count,
        })
    }

    async fn teardown(&self, _server: &ServerSubject) -> Result<(), AdapterError> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub adapter: Arc<FakeAdapter>,
    pub containers: Arc<FakeContainers>,
    pub browsers: Arc<FakeBrowsers>,
}

/// Short timeouts and a fast sampling cadence
pub fn harness_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.timeouts.provision_ms = 1_000;
    config.timeouts.connect_ms = 2_000;
    config.timeouts.drain_ms = 30_000;
    config.monitor.sample_interval_ms = 20;
    config
}

pub fn harness(protocol: &str, mode: SendMode, behavior: Behavior, config: HarnessConfig) -> Harness {
    let network = FakeNetwork::default();
    let adapter = Arc::new(FakeAdapter::new(
        protocol,
        mode,
        behavior.clone(),
        network.clone(),
    ));
    let containers = Arc::new(FakeContainers::new(behavior.clone()));
    let browsers = Arc::new(FakeBrowsers::new(behavior, network));

    let mut registry = AdapterRegistry::new();
    registry.register(adapter.clone());

    let orchestrator = Orchestrator::new(config, registry, containers.clone(), browsers.clone());
    containers.phases.follow(orchestrator.phases());
    browsers.phases.follow(orchestrator.phases());
    Harness {
        orchestrator,
        adapter,
        containers,
        browsers,
    }
}

pub fn test_config(protocol: &str, clients: u32, messages: u32, repetitions: u32) -> TestConfiguration {
    TestConfiguration {
        protocol: protocol.to_string(),
        clients,
        messages,
        payload_bytes: 64,
        repetitions,
        output: PathBuf::from(format!("results/{}.json", protocol)),
    }
}
