//! Shared run clock

use std::time::Instant;

/// Millisecond clock shared by the bridge, the monitors and the orchestrator.
///
/// The wall-clock epoch is read once when the run starts and advanced with
/// `Instant`, so timestamps taken by different tasks of one run are
/// monotonic and comparable with the epoch timestamps browser clients
/// report.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    epoch_ms: i64,
    anchor: Instant,
}

impl RunClock {
    pub fn start() -> Self {
        Self {
            epoch_ms: chrono::Utc::now().timestamp_millis(),
            anchor: Instant::now(),
        }
    }

    /// Epoch milliseconds
    pub fn now_ms(&self) -> i64 {
        self.epoch_ms + self.anchor.elapsed().as_millis() as i64
    }

    pub fn started_at_ms(&self) -> i64 {
        self.epoch_ms
    }
}
