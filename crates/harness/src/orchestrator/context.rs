//! Per-run state threaded through every phase

use std::collections::BTreeMap;

use futures::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use rtbench_common::{RunResult, RunStatus, SubjectId, TestConfiguration, UsageSample};

use super::collector::RunCollector;
use super::phase::PhaseTracker;
use crate::adapter::ProtocolAdapter;
use crate::clock::RunClock;
use crate::error::HarnessResult;
use crate::monitor::{MonitorHandle, ResourceMonitor, UsageProbe};
use crate::supervisor::{ServerSubject, Supervisor};

/// Everything that belongs to one repetition. Nothing outlives it.
pub struct RunContext {
    pub run_id: Uuid,
    pub run_index: u32,
    pub config: TestConfiguration,
    pub clock: RunClock,
    pub tracker: PhaseTracker,
    pub collector: RunCollector,
    pub supervisor: Supervisor,
    pub server: Option<ServerSubject>,
    pub send_started_at_ms: Option<i64>,
    pub incomplete_reason: Option<String>,
    monitors: Vec<MonitorHandle>,
}

impl RunContext {
    pub fn new(config: &TestConfiguration, run_index: u32, supervisor: Supervisor) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            run_index,
            config: config.clone(),
            clock: RunClock::start(),
            tracker: PhaseTracker::new(run_index),
            collector: RunCollector::new(config.clients, config.messages),
            supervisor,
            server: None,
            send_started_at_ms: None,
            incomplete_reason: None,
            monitors: Vec::new(),
        }
    }

    /// Start sampling a subject. A probe that cannot be created leaves the
    /// subject unmonitored.
    pub fn watch(
        &mut self,
        subject: SubjectId,
        probe: HarnessResult<Box<dyn UsageProbe>>,
        interval: std::time::Duration,
    ) {
        match probe {
            Ok(probe) => {
                let handle = ResourceMonitor::watch(subject, probe, interval, self.clock);
                self.monitors.push(handle);
            }
            Err(e) => warn!(subject = %subject, error = %e, "Subject will not be monitored"),
        }
    }

    /// Stop every monitor and collect their series
    pub async fn stop_monitors(&mut self) -> BTreeMap<SubjectId, Vec<UsageSample>> {
        let handles = std::mem::take(&mut self.monitors);
        join_all(handles.into_iter().map(MonitorHandle::stop))
            .await
            .into_iter()
            .collect()
    }

    /// Adapter teardown followed by every started subject. Runs on every
    /// exit path and is safe to repeat.
    pub async fn release(&mut self, adapter: &dyn ProtocolAdapter) {
        if let Some(server) = self.server.take() {
            if let Err(e) = adapter.teardown(&server).await {
                warn!(run = self.run_index, error = %e, "Adapter teardown failed");
            }
        }

        let report = self.supervisor.stop_all().await;
        info!(
            run = self.run_index,
            stopped = report.stopped,
            failed = report.failed,
            "Subjects released"
        );
    }

    pub fn into_result(self, usage_series: BTreeMap<SubjectId, Vec<UsageSample>>) -> RunResult {
        let incomplete_clients = self.collector.incomplete_clients();
        let status = if incomplete_clients.is_empty() {
            RunStatus::Complete
        } else {
            RunStatus::Incomplete {
                reason: self.incomplete_reason.unwrap_or_else(|| {
                    format!(
                        "{} client(s) did not receive every message",
                        incomplete_clients.len()
                    )
                }),
            }
        };

        RunResult {
            run_id: self.run_id,
            run_index: self.run_index,
            config: self.config,
            started_at_ms: self.clock.started_at_ms(),
            send_started_at_ms: self.send_started_at_ms,
            status,
            incomplete_clients,
            client_errors: self.collector.client_errors(),
            rejected_events: self.collector.rejected(),
            phase_durations_ms: self.tracker.durations_ms().clone(),
            per_client_latency: self.collector.into_latency(),
            usage_series,
        }
    }
}
