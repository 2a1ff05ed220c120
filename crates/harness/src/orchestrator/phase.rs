//! Run phases and their legal transitions

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::error::{HarnessError, HarnessResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Provisioning,
    WarmingClients,
    Sending,
    Draining,
    Aggregating,
    Done,
    Aborting,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Provisioning => "provisioning",
            RunPhase::WarmingClients => "warming_clients",
            RunPhase::Sending => "sending",
            RunPhase::Draining => "draining",
            RunPhase::Aggregating => "aggregating",
            RunPhase::Done => "done",
            RunPhase::Aborting => "aborting",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Aborting)
    }

    /// The phase that follows on success
    fn successor(&self) -> Option<RunPhase> {
        match self {
            RunPhase::Idle => Some(RunPhase::Provisioning),
            RunPhase::Provisioning => Some(RunPhase::WarmingClients),
            RunPhase::WarmingClients => Some(RunPhase::Sending),
            RunPhase::Sending => Some(RunPhase::Draining),
            RunPhase::Draining => Some(RunPhase::Aggregating),
            RunPhase::Aggregating => Some(RunPhase::Done),
            RunPhase::Done | RunPhase::Aborting => None,
        }
    }

    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        if next == RunPhase::Aborting {
            return !self.is_terminal();
        }
        self.successor() == Some(next)
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current phase of one run and the time spent in each phase
#[derive(Debug)]
pub struct PhaseTracker {
    run_index: u32,
    current: RunPhase,
    entered: Instant,
    durations_ms: BTreeMap<String, u64>,
    observer: Option<Arc<watch::Sender<RunPhase>>>,
}

impl PhaseTracker {
    pub fn new(run_index: u32) -> Self {
        Self {
            run_index,
            current: RunPhase::Idle,
            entered: Instant::now(),
            durations_ms: BTreeMap::new(),
            observer: None,
        }
    }

    /// Mirror every transition into `observer`, starting with the current phase
    pub fn publish_to(&mut self, observer: Arc<watch::Sender<RunPhase>>) {
        observer.send_replace(self.current);
        self.observer = Some(observer);
    }

    pub fn current(&self) -> RunPhase {
        self.current
    }

    pub fn transition(&mut self, next: RunPhase) -> HarnessResult<()> {
        if !self.current.can_transition_to(next) {
            return Err(HarnessError::Internal(format!(
                "illegal phase transition {} -> {}",
                self.current, next
            )));
        }

        let elapsed = self.close_current();
        info!(
            run = self.run_index,
            from = %self.current,
            to = %next,
            elapsed_ms = elapsed,
            "Phase transition"
        );
        self.current = next;
        self.entered = Instant::now();
        if let Some(observer) = &self.observer {
            observer.send_replace(next);
        }
        Ok(())
    }

    /// Move to `Aborting` unless the run already ended
    pub fn abort(&mut self) {
        if self.current.is_terminal() {
            return;
        }
        let _ = self.transition(RunPhase::Aborting);
    }

    fn close_current(&mut self) -> u64 {
        let elapsed = self.entered.elapsed().as_millis() as u64;
        if self.current != RunPhase::Idle {
            *self
                .durations_ms
                .entry(self.current.as_str().to_string())
                .or_insert(0) += elapsed;
        }
        elapsed
    }

    /// Time spent per phase so far, in milliseconds
    pub fn durations_ms(&self) -> &BTreeMap<String, u64> {
        &self.durations_ms
    }
}
