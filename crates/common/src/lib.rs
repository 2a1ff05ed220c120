//! rtbench Common Library
//!
//! Data model shared by the harness and the CLI: test configurations,
//! per-message events, resource usage samples, run results and their
//! statistical reduction across repetitions.

pub mod error;
pub mod stats;
pub mod types;

pub use error::{Error, Result};
pub use stats::{MetricStats, RunSummary};
pub use types::*;

/// rtbench version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
