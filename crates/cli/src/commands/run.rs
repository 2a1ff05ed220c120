//! Run one configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use rtbench_common::TestConfiguration;
use rtbench_harness::{HarnessConfig, Orchestrator, ResultExporter};

use super::show::print_aggregate;
use crate::output::{print_success, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Protocol to benchmark (see `rtbench protocols`)
    #[arg(short, long)]
    pub protocol: String,

    /// Concurrent clients
    #[arg(short = 'n', long, default_value_t = 100)]
    pub clients: u32,

    /// Messages delivered to every client
    #[arg(short, long, default_value_t = 1000)]
    pub messages: u32,

    /// Payload size of one message
    #[arg(long, default_value_t = 64)]
    pub payload_bytes: u32,

    /// Repetitions of the whole run
    #[arg(short, long, default_value_t = 10)]
    pub repetitions: u32,

    /// Result file (default: results/<protocol>-<clients>x<messages>.json)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// List every repetition in the summary
    #[arg(long)]
    pub runs: bool,
}

impl RunArgs {
    pub fn configuration(&self) -> TestConfiguration {
        let output = self.output.clone().unwrap_or_else(|| {
            PathBuf::from("results").join(format!(
                "{}-{}x{}.json",
                self.protocol, self.clients, self.messages
            ))
        });
        TestConfiguration {
            protocol: self.protocol.clone(),
            clients: self.clients,
            messages: self.messages,
            payload_bytes: self.payload_bytes,
            repetitions: self.repetitions,
            output,
        }
    }
}

pub async fn execute(args: RunArgs, harness: HarnessConfig, format: OutputFormat) -> Result<()> {
    let config = args.configuration();
    let orchestrator = Orchestrator::with_defaults(harness)?;

    let aggregate = orchestrator.run_configuration(&config).await?;
    ResultExporter::write_aggregate(&config, &aggregate)?;

    print_aggregate(&aggregate, args.runs, format);
    print_success(&format!("Results written to {}", config.output.display()));
    Ok(())
}
