//! Run a YAML test plan

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use tracing::info;

use rtbench_harness::{HarnessConfig, Orchestrator, ResultExporter, TestPlan};

use super::show::print_aggregate;
use crate::output::{print_error, print_success, OutputFormat};

#[derive(Args)]
pub struct PlanArgs {
    /// Plan file, or a directory of plan files
    pub path: PathBuf,

    /// Keep going after a configuration fails
    #[arg(long)]
    pub keep_going: bool,
}

pub async fn execute(args: PlanArgs, harness: HarnessConfig, format: OutputFormat) -> Result<()> {
    let plans = if args.path.is_dir() {
        TestPlan::load_all(&args.path)?
    } else {
        vec![TestPlan::load(&args.path)?]
    };
    let orchestrator = Orchestrator::with_defaults(harness)?;

    // Validate every configuration before the first run starts.
    for plan in &plans {
        for config in plan.configurations() {
            orchestrator.validate(&config)?;
        }
    }

    let mut failed = 0;
    for plan in &plans {
        info!(plan = %plan.name, configurations = plan.runs.len(), "Running plan");
        for config in plan.configurations() {
            match orchestrator.run_configuration(&config).await {
                Ok(aggregate) => {
                    ResultExporter::write_aggregate(&config, &aggregate)?;
                    print_aggregate(&aggregate, false, format);
                    print_success(&format!("Results written to {}", config.output.display()));
                }
                Err(e) => {
                    failed += 1;
                    print_error(&format!("{} ({}): {}", plan.name, config.protocol, e));
                    if !args.keep_going {
                        bail!("plan '{}' stopped after a failed configuration", plan.name);
                    }
                }
            }
        }
    }

    if failed > 0 {
        bail!("{} configuration(s) failed", failed);
    }
    Ok(())
}
