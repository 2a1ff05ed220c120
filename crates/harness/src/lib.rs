//! rtbench harness
//!
//! Runs the same load against different real-time messaging stacks and
//! records what every client saw:
//! - Starts the server stack of a protocol and waits for its readiness marker
//! - Spreads N browser clients over browser processes under a per-browser
//!   connection cap
//! - Asks the server to push M messages through one uniform trigger
//! - Samples CPU and memory of every subject while the run is in flight
//! - Reduces R repetitions into an aggregate and writes it as JSON
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Orchestrator (Rust)                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  run_configuration(TestConfiguration) -> AggregateResult    │
//! │    └── run_once() x R, each with a fresh RunContext         │
//! │          ├── ProtocolAdapter   prepare / trigger_send       │
//! │          ├── Supervisor        server + browser subjects    │
//! │          ├── ResourceMonitor   one sampler per subject      │
//! │          └── ClientBridge      browser events -> collector  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ResultExporter       ResultFile (JSON)                     │
//! │  TestPlan (YAML)      many configurations, one file         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod error;
pub mod export;
pub mod monitor;
pub mod orchestrator;
pub mod plan;
pub mod supervisor;

pub use adapter::{AdapterRegistry, ProtocolAdapter, SendMode};
pub use config::HarnessConfig;
pub use error::{HarnessError, HarnessResult, RunError};
pub use export::{ResultExporter, ResultFile};
pub use orchestrator::{Orchestrator, RunPhase};
pub use plan::TestPlan;

/// Harness version recorded in result files
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
