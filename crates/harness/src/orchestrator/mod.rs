//! Test orchestrator
//!
//! Drives one `TestConfiguration` through its repetitions. Every repetition
//! walks the phase machine
//!
//! ```text
//! Idle -> Provisioning -> WarmingClients -> Sending -> Draining -> Aggregating -> Done
//!   \__________\______________\_______________\__________\____________\-> Aborting
//! ```
//!
//! and releases every subject it started before reporting, whichever way
//! it ends.

mod collector;
mod context;
mod phase;

pub use collector::{Observation, RunCollector};
pub use context::RunContext;
pub use phase::{PhaseTracker, RunPhase};

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use rtbench_common::{AggregateResult, RunResult, SubjectId, TestConfiguration};

use crate::adapter::{AdapterRegistry, ProtocolAdapter, SendPlan};
use crate::bridge::{BridgeEvent, ClientBridge};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult, RunError};
use crate::supervisor::{
    BrowserBackend, ComposeBackend, ContainerBackend, PlaywrightBackend, Supervisor,
};

pub struct Orchestrator {
    config: HarnessConfig,
    registry: AdapterRegistry,
    containers: Arc<dyn ContainerBackend>,
    browsers: Arc<dyn BrowserBackend>,
    phases: Arc<watch::Sender<RunPhase>>,
}

impl Orchestrator {
    pub fn new(
        config: HarnessConfig,
        registry: AdapterRegistry,
        containers: Arc<dyn ContainerBackend>,
        browsers: Arc<dyn BrowserBackend>,
    ) -> Self {
        let (phases, _) = watch::channel(RunPhase::Idle);
        Self {
            config,
            registry,
            containers,
            browsers,
            phases: Arc::new(phases),
        }
    }

    /// Built-in adapters, `docker compose` servers and Playwright browsers
    pub fn with_defaults(config: HarnessConfig) -> HarnessResult<Self> {
        config.validate()?;
        let registry = AdapterRegistry::from_config(&config)?;
        let containers = Arc::new(
            ComposeBackend::new(config.monitor.docker_api.clone(), config.timeouts.stop_grace())
                .with_cli(config.container_cli.clone()),
        );
        let browsers = Arc::new(PlaywrightBackend::new(
            config.browser.clone(),
            config.timeouts.stop_grace(),
        ));
        Ok(Self::new(config, registry, containers, browsers))
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Phase of the repetition in flight
    pub fn phases(&self) -> watch::Receiver<RunPhase> {
        self.phases.subscribe()
    }

    /// Reject a configuration before anything is started
    pub fn validate(&self, config: &TestConfiguration) -> HarnessResult<()> {
        self.config.validate_run(config)?;
        self.registry.get(&config.protocol)?;
        Ok(())
    }

    /// Run all repetitions of `config` sequentially.
    ///
    /// The first failed repetition ends the configuration; it is reported,
    /// not retried.
    pub async fn run_configuration(
        &self,
        config: &TestConfiguration,
    ) -> Result<AggregateResult, RunError> {
        let adapter = self
            .validate(config)
            .and_then(|_| self.registry.get(&config.protocol))
            .map_err(|source| RunError {
                phase: RunPhase::Idle,
                run_index: 0,
                source,
            })?;

        info!(
            protocol = %config.protocol,
            clients = config.clients,
            messages = config.messages,
            payload_bytes = config.payload_bytes,
            repetitions = config.repetitions,
            send_mode = %adapter.send_mode(),
            "Starting configuration"
        );

        let mut runs = Vec::with_capacity(config.repetitions as usize);
        for run_index in 0..config.repetitions {
            let run = self.run_once(adapter.as_ref(), config, run_index).await?;
            info!(
                run = run_index,
                status = %run.status,
                clients = run.per_client_latency.len(),
                "Run finished"
            );
            runs.push(run);
        }

        let aggregate = AggregateResult::from_runs(config, runs);
        info!(
            protocol = %aggregate.protocol,
            complete = aggregate.complete_runs,
            incomplete = aggregate.incomplete_runs,
            "Configuration finished"
        );
        Ok(aggregate)
    }

    /// One repetition with a fresh context
    pub async fn run_once(
        &self,
        adapter: &dyn ProtocolAdapter,
        config: &TestConfiguration,
        run_index: u32,
    ) -> Result<RunResult, RunError> {
        let supervisor = Supervisor::new(
            Arc::clone(&self.containers),
            Arc::clone(&self.browsers),
            self.config.browser.per_browser_cap,
        );
        let mut ctx = RunContext::new(config, run_index, supervisor);
        ctx.tracker.publish_to(Arc::clone(&self.phases));

        let outcome = match self.drive(adapter, &mut ctx).await {
            Ok(()) => ctx.tracker.transition(RunPhase::Aggregating),
            Err(e) => Err(e),
        };
        let failed_in = ctx.tracker.current();
        if outcome.is_err() {
            ctx.tracker.abort();
        }

        let usage_series = ctx.stop_monitors().await;
        ctx.release(adapter).await;

        match outcome.and_then(|_| ctx.tracker.transition(RunPhase::Done)) {
            Ok(()) => Ok(ctx.into_result(usage_series)),
            Err(source) => {
                ctx.tracker.abort();
                error!(run = run_index, phase = %failed_in, error = %source, "Run aborted");
                Err(RunError {
                    phase: failed_in,
                    run_index,
                    source,
                })
            }
        }
    }

    async fn drive(&self, adapter: &dyn ProtocolAdapter, ctx: &mut RunContext) -> HarnessResult<()> {
        let interval = self.config.monitor.sample_interval();

        ctx.tracker.transition(RunPhase::Provisioning)?;
        let spec = adapter.prepare_server(&ctx.config)?;
        let server = ctx
            .supervisor
            .start_container_subject(&spec, self.config.timeouts.provision())
            .await?;
        ctx.server = Some(server.clone());
        let probe = ctx.supervisor.container_probe(&server);
        ctx.watch(SubjectId::server(), probe, interval);

        ctx.tracker.transition(RunPhase::WarmingClients)?;
        let script = Arc::new(adapter.prepare_client(&server)?);
        let (events, mut bridge) = ClientBridge::channel(self.config.bridge_buffer);
        ctx.supervisor
            .start_browser_subjects(
                ctx.config.clients,
                &server.endpoint,
                ctx.config.messages,
                script,
                events,
            )
            .await?;
        for browser in ctx.supervisor.browsers() {
            let probe = ctx.supervisor.browser_probe(&browser);
            ctx.watch(browser.id.clone(), probe, interval);
        }
        self.wait_connected(ctx, &mut bridge).await?;

        ctx.tracker.transition(RunPhase::Sending)?;
        let plan = SendPlan::new(&ctx.config, adapter.send_mode());
        info!(
            run = ctx.run_index,
            calls = plan.calls().len(),
            messages = plan.total(),
            "Triggering send"
        );
        ctx.send_started_at_ms = Some(ctx.clock.now_ms());
        for call in plan.calls() {
            let ack = adapter.trigger_send(&server, call).await?;
            if ack.accepted != call.count {
                warn!(
                    requested = call.count,
                    accepted = ack.accepted,
                    "Server accepted a different message count"
                );
            }
            while let Some(event) = bridge.try_recv() {
                observe_strict(ctx, event)?;
            }
        }

        ctx.tracker.transition(RunPhase::Draining)?;
        self.drain(ctx, &mut bridge).await
    }

    async fn wait_connected(
        &self,
        ctx: &mut RunContext,
        bridge: &mut ClientBridge,
    ) -> HarnessResult<()> {
        let timeout = self.config.timeouts.connect();
        let deadline = Instant::now() + timeout;

        while !ctx.collector.all_connected() {
            match timeout_at(deadline, bridge.recv()).await {
                Ok(Some(event)) => observe_strict(ctx, event)?,
                Ok(None) => {
                    return Err(HarnessError::BridgeDisconnect(
                        "every browser exited before all clients connected".into(),
                    ))
                }
                Err(_) => {
                    return Err(HarnessError::ClientConnectTimeout {
                        connected: ctx.collector.connected(),
                        expected: ctx.config.clients as usize,
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
            }
        }

        info!(run = ctx.run_index, clients = ctx.collector.connected(), "All clients connected");
        Ok(())
    }

    async fn drain(&self, ctx: &mut RunContext, bridge: &mut ClientBridge) -> HarnessResult<()> {
        let timeout = self.config.timeouts.drain();
        let deadline = Instant::now() + timeout;

        while !ctx.collector.drain_ready() {
            match timeout_at(deadline, bridge.recv()).await {
                Ok(Some(event)) => {
                    ctx.collector.observe(event);
                }
                Ok(None) => {
                    ctx.incomplete_reason =
                        Some("client bridge closed before every client finished".into());
                    break;
                }
                Err(_) => {
                    let incomplete = ctx.collector.incomplete_clients().len();
                    if self.config.fail_on_incomplete {
                        return Err(HarnessError::DrainTimeout {
                            incomplete,
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                    warn!(
                        run = ctx.run_index,
                        incomplete,
                        timeout_ms = timeout.as_millis() as u64,
                        "Drain timed out, keeping partial results"
                    );
                    ctx.incomplete_reason =
                        Some(format!("drain timed out after {} ms", timeout.as_millis()));
                    break;
                }
            }
        }

        while let Some(event) = bridge.try_recv() {
            ctx.collector.observe(event);
        }

        if ctx.collector.disconnected() > 0 && ctx.incomplete_reason.is_none() {
            ctx.incomplete_reason = Some(format!(
                "{} client(s) disconnected while draining",
                ctx.collector.disconnected()
            ));
        }
        Ok(())
    }
}

/// Record an event while clients must stay connected
fn observe_strict(ctx: &mut RunContext, event: BridgeEvent) -> HarnessResult<()> {
    match ctx.collector.observe(event) {
        Observation::Disconnected(client_id) => {
            Err(HarnessError::BridgeDisconnect(format!(
                "client {} disconnected during {}",
                client_id,
                ctx.tracker.current()
            )))
        }
        _ => Ok(()),
    }
}
