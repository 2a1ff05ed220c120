//! Show a result file

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use rtbench_common::{AggregateResult, MetricStats, RunResult};
use rtbench_harness::{ResultExporter, ResultFile};

use crate::output::{print_heading, print_list, print_warning, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct ShowArgs {
    /// Result file written by `run` or `plan`
    pub file: PathBuf,

    /// Also list every repetition
    #[arg(long)]
    pub runs: bool,
}

/// One aggregate metric
#[derive(Serialize)]
pub struct MetricDisplay {
    pub metric: &'static str,
    pub unit: &'static str,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub samples: u32,
}

impl MetricDisplay {
    fn new(metric: &'static str, unit: &'static str, stats: &MetricStats, scale: f64) -> Self {
        Self {
            metric,
            unit,
            mean: stats.mean / scale,
            std_dev: stats.std_dev() / scale,
            min: stats.min / scale,
            max: stats.max / scale,
            samples: stats.samples,
        }
    }

    pub fn from_aggregate(aggregate: &AggregateResult) -> Vec<Self> {
        const MIB: f64 = 1024.0 * 1024.0;
        let metrics: [(&'static str, &'static str, &Option<MetricStats>, f64); 7] = [
            ("time to first message", "ms", &aggregate.time_to_first_ms, 1.0),
            ("time to last message", "ms", &aggregate.time_to_last_ms, 1.0),
            ("slowest client", "ms", &aggregate.max_time_to_last_ms, 1.0),
            ("server cpu", "%", &aggregate.server_cpu_percent, 1.0),
            ("server memory", "MiB", &aggregate.server_memory_bytes, MIB),
            ("client cpu", "%", &aggregate.client_cpu_percent, 1.0),
            ("client memory", "MiB", &aggregate.client_memory_bytes, MIB),
        ];

        metrics
            .into_iter()
            .filter_map(|(metric, unit, stats, scale)| {
                stats
                    .as_ref()
                    .map(|stats| Self::new(metric, unit, stats, scale))
            })
            .collect()
    }
}

impl TableDisplay for MetricDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Metric", "Unit", "Mean", "Std Dev", "Min", "Max", "Runs"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.metric.to_string(),
            self.unit.to_string(),
            format!("{:.2}", self.mean),
            format!("{:.2}", self.std_dev),
            format!("{:.2}", self.min),
            format!("{:.2}", self.max),
            self.samples.to_string(),
        ]
    }
}

/// One repetition
#[derive(Serialize)]
pub struct RunDisplay {
    pub run: u32,
    pub status: String,
    pub clients: usize,
    pub incomplete: usize,
    pub mean_time_to_last_ms: Option<f64>,
    pub server_samples: usize,
    pub client_errors: u32,
    pub rejected_events: u32,
}

impl From<&RunResult> for RunDisplay {
    fn from(run: &RunResult) -> Self {
        let summary = run.summary();
        Self {
            run: run.run_index,
            status: run.status.to_string(),
            clients: run.per_client_latency.len(),
            incomplete: run.incomplete_clients.len(),
            mean_time_to_last_ms: summary.mean_time_to_last_ms,
            server_samples: run
                .usage_series
                .iter()
                .filter(|(subject, _)| subject.is_server())
                .map(|(_, series)| series.len())
                .sum(),
            client_errors: run.client_errors,
            rejected_events: run.rejected_events,
        }
    }
}

impl TableDisplay for RunDisplay {
    fn headers() -> Vec<&'static str> {
        vec![
            "Run",
            "Status",
            "Clients",
            "Incomplete",
            "Time to Last",
            "Server Samples",
            "Errors",
            "Rejected",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.run.to_string(),
            self.status.clone(),
            self.clients.to_string(),
            self.incomplete.to_string(),
            self.mean_time_to_last_ms
                .map(|ms| format!("{:.1}ms", ms))
                .unwrap_or_else(|| "-".to_string()),
            self.server_samples.to_string(),
            self.client_errors.to_string(),
            self.rejected_events.to_string(),
        ]
    }
}

/// Print the aggregate of one configuration
pub fn print_aggregate(aggregate: &AggregateResult, with_runs: bool, format: OutputFormat) {
    print_heading(
        &format!(
            "{}: {} complete, {} incomplete of {} repetitions",
            aggregate.protocol,
            aggregate.complete_runs,
            aggregate.incomplete_runs,
            aggregate.repetitions
        ),
        format,
    );
    print_list(&MetricDisplay::from_aggregate(aggregate), format);

    if aggregate.incomplete_runs > 0 {
        print_warning(&format!(
            "{} incomplete run(s) are excluded from the statistics",
            aggregate.incomplete_runs
        ));
    }

    if with_runs {
        let runs: Vec<RunDisplay> = aggregate.runs.iter().map(RunDisplay::from).collect();
        print_list(&runs, format);
    }
}

pub fn execute(args: ShowArgs, format: OutputFormat) -> Result<()> {
    let file: ResultFile = ResultExporter::load(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;

    print_heading(
        &format!(
            "rtbench {} on {} ({} cores), {}",
            file.version,
            file.host.hostname.as_deref().unwrap_or("unknown host"),
            file.host.cpu_cores,
            file.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        format,
    );
    print_aggregate(&file.aggregate, args.runs, format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_metrics_skip_missing_stats() {
        let config = rtbench_common::TestConfiguration {
            protocol: "sse".into(),
            clients: 1,
            messages: 1,
            payload_bytes: 1,
            repetitions: 1,
            output: PathBuf::from("x.json"),
        };
        let mut aggregate = AggregateResult::from_runs(&config, Vec::new());
        assert!(MetricDisplay::from_aggregate(&aggregate).is_empty());

        aggregate.server_memory_bytes = MetricStats::from_values(&[2.0 * 1024.0 * 1024.0]);
        let rows = MetricDisplay::from_aggregate(&aggregate);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].unit, "MiB");
        assert!((rows[0].mean - 2.0).abs() < 1e-9);
    }
}
