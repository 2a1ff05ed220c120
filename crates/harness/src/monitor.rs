//! Resource monitoring of server containers and browser processes

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use rtbench_common::{SubjectId, UsageSample};

use crate::clock::RunClock;
use crate::error::{HarnessError, HarnessResult};

/// One CPU/memory reading of a subject
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageReading {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
}

/// Source of usage readings for one subject
#[async_trait]
pub trait UsageProbe: Send {
    async fn sample(&mut self) -> HarnessResult<UsageReading>;
}

// ============================================================================
// Container statistics
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ContainerStats {
    #[serde(default)]
    pub cpu_stats: CpuStats,
    #[serde(default)]
    pub precpu_stats: CpuStats,
    #[serde(default)]
    pub memory_stats: MemoryStats,
}

#[derive(Debug, Default, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: CpuUsage,
    pub system_cpu_usage: Option<u64>,
    pub online_cpus: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CpuUsage {
    #[serde(default)]
    pub total_usage: u64,
    pub percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MemoryStats {
    pub usage: Option<u64>,
    #[serde(default)]
    pub stats: HashMap<String, u64>,
}

impl ContainerStats {
    /// (cpu delta / system delta) × online CPUs × 100
    pub fn cpu_percent(&self) -> f64 {
        let cpu_delta = self
            .cpu_stats
            .cpu_usage
            .total_usage
            .saturating_sub(self.precpu_stats.cpu_usage.total_usage);
        let system_delta = match (
            self.cpu_stats.system_cpu_usage,
            self.precpu_stats.system_cpu_usage,
        ) {
            (Some(now), Some(before)) => now.saturating_sub(before),
            _ => 0,
        };
        if cpu_delta == 0 || system_delta == 0 {
            return 0.0;
        }

        let online_cpus = self
            .cpu_stats
            .online_cpus
            .filter(|n| *n > 0)
            .or_else(|| {
                self.cpu_stats
                    .cpu_usage
                    .percpu_usage
                    .as_ref()
                    .map(|p| p.len() as u32)
            })
            .filter(|n| *n > 0)
            .unwrap_or(1);

        cpu_delta as f64 / system_delta as f64 * online_cpus as f64 * 100.0
    }

    /// Usage minus reclaimable page cache (cgroup v1 and v2 keys)
    pub fn working_set_bytes(&self) -> u64 {
        let usage = self.memory_stats.usage.unwrap_or(0);
        let inactive = self
            .memory_stats
            .stats
            .get("total_inactive_file")
            .or_else(|| self.memory_stats.stats.get("inactive_file"))
            .copied()
            .unwrap_or(0);
        usage.saturating_sub(inactive)
    }
}

/// Samples a container through the container runtime statistics API
pub struct DockerStatsProbe {
    client: reqwest::Client,
    url: String,
}

impl DockerStatsProbe {
    pub fn new(docker_api: &str, container: &str) -> HarnessResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            url: format!(
                "{}/containers/{}/stats?stream=false",
                docker_api.trim_end_matches('/'),
                container
            ),
        })
    }
}

#[async_trait]
impl UsageProbe for DockerStatsProbe {
    async fn sample(&mut self) -> HarnessResult<UsageReading> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            return Err(HarnessError::Supervisor(format!(
                "stats endpoint returned {}",
                resp.status()
            )));
        }
        let stats: ContainerStats = resp.json().await?;
        Ok(UsageReading {
            cpu_percent: stats.cpu_percent(),
            memory_bytes: stats.working_set_bytes(),
        })
    }
}

// ============================================================================
// Process accounting
// ============================================================================

/// Samples a process and all of its descendants via OS accounting.
///
/// Browsers fork renderer and GPU processes, so the tree is what gets
/// measured, not just the launcher pid.
///
/// CPU usage is a rate over two refreshes, so the probe refreshes once on
/// creation and a process joining the tree later contributes memory only
/// until its second observation.
pub struct ProcessProbe {
    system: System,
    root: Pid,
    seen: HashSet<Pid>,
}

impl ProcessProbe {
    pub fn new(pid: u32) -> Self {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        let seen = system.processes().keys().copied().collect();
        Self {
            system,
            root: Pid::from_u32(pid),
            seen,
        }
    }

    fn tree(&self) -> Vec<Pid> {
        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (pid, process) in self.system.processes() {
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*pid);
            }
        }

        let mut seen = HashSet::new();
        let mut stack = vec![self.root];
        while let Some(pid) = stack.pop() {
            if !seen.insert(pid) {
                continue;
            }
            if let Some(kids) = children.get(&pid) {
                stack.extend(kids.iter().copied());
            }
        }
        seen.into_iter().collect()
    }
}

#[async_trait]
impl UsageProbe for ProcessProbe {
    async fn sample(&mut self) -> HarnessResult<UsageReading> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        if self.system.process(self.root).is_none() {
            return Err(HarnessError::Supervisor(format!(
                "process {} is not running",
                self.root
            )));
        }

        let mut reading = UsageReading {
            cpu_percent: 0.0,
            memory_bytes: 0,
        };
        for pid in self.tree() {
            let Some(process) = self.system.process(pid) else {
                continue;
            };
            reading.memory_bytes += process.memory();
            if !self.seen.insert(pid) {
                reading.cpu_percent += process.cpu_usage() as f64;
            }
        }
        Ok(reading)
    }
}

// ============================================================================
// Monitor
// ============================================================================

/// Fixed-cadence sampler of one subject
pub struct ResourceMonitor;

impl ResourceMonitor {
    /// Start sampling `subject` every `interval` until the handle is stopped.
    ///
    /// The first sample is taken immediately. A failed sample is logged and
    /// skipped; the cadence is kept.
    pub fn watch(
        subject: SubjectId,
        mut probe: Box<dyn UsageProbe>,
        interval: Duration,
        clock: RunClock,
    ) -> MonitorHandle {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let task_subject = subject.clone();

        let task = tokio::spawn(async move {
            let mut series = Vec::new();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                match probe.sample().await {
                    Ok(reading) => series.push(UsageSample {
                        subject_id: task_subject.clone(),
                        timestamp_ms: clock.now_ms(),
                        cpu_percent: reading.cpu_percent,
                        memory_bytes: reading.memory_bytes,
                    }),
                    Err(e) => warn!(subject = %task_subject, error = %e, "Usage sample skipped"),
                }

                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }
            }

            debug!(subject = %task_subject, samples = series.len(), "Monitor stopped");
            series
        });

        MonitorHandle {
            subject,
            token,
            task,
        }
    }
}

/// Running monitor; stopping it yields the ordered series
pub struct MonitorHandle {
    subject: SubjectId,
    token: CancellationToken,
    task: JoinHandle<Vec<UsageSample>>,
}

impl MonitorHandle {
    pub async fn stop(self) -> (SubjectId, Vec<UsageSample>) {
        self.token.cancel();
        let series = match self.task.await {
            Ok(series) => series,
            Err(e) => {
                warn!(subject = %self.subject, error = %e, "Monitor task failed");
                Vec::new()
            }
        };
        (self.subject, series)
    }
}
