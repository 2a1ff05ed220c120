//! Statistical reduction of runs and repetition sets

use serde::{Deserialize, Serialize};

use crate::types::{RunResult, UsageSample};

/// Mean and spread of one metric across repetitions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub mean: f64,
    /// Sample variance (n - 1 denominator); zero for a single value
    pub variance: f64,
    pub min: f64,
    pub max: f64,
    pub samples: u32,
}

impl MetricStats {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = if values.len() > 1 {
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            mean,
            variance,
            min,
            max,
            samples: values.len() as u32,
        })
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

/// Per-run scalar metrics fed into the aggregate
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    pub mean_time_to_first_ms: Option<f64>,
    pub mean_time_to_last_ms: Option<f64>,
    pub max_time_to_last_ms: Option<f64>,
    pub server_cpu_mean: Option<f64>,
    pub server_memory_peak: Option<f64>,
    /// Sum over browser processes of their mean CPU%
    pub client_cpu_mean: Option<f64>,
    /// Sum over browser processes of their peak memory
    pub client_memory_peak: Option<f64>,
}

impl RunSummary {
    pub fn from_run(run: &RunResult) -> Self {
        let mut summary = Self::default();

        // Without a recorded send start, latencies are relative to the
        // earliest receipt of the run.
        let reference = run.send_started_at_ms.or_else(|| {
            run.per_client_latency
                .values()
                .map(|l| l.first_received_at_ms)
                .min()
        });

        if let Some(reference) = reference {
            let firsts: Vec<f64> = run
                .per_client_latency
                .values()
                .map(|l| (l.first_received_at_ms - reference).max(0) as f64)
                .collect();
            let lasts: Vec<f64> = run
                .per_client_latency
                .values()
                .map(|l| (l.last_received_at_ms - reference).max(0) as f64)
                .collect();

            summary.mean_time_to_first_ms = mean(&firsts);
            summary.mean_time_to_last_ms = mean(&lasts);
            summary.max_time_to_last_ms = lasts.iter().copied().reduce(f64::max);
        }

        for (subject, series) in &run.usage_series {
            if series.is_empty() {
                continue;
            }
            let cpu = cpu_mean(series);
            let memory = memory_peak(series);
            if subject.is_server() {
                summary.server_cpu_mean = Some(cpu);
                summary.server_memory_peak = Some(memory);
            } else {
                summary.client_cpu_mean = Some(summary.client_cpu_mean.unwrap_or(0.0) + cpu);
                summary.client_memory_peak =
                    Some(summary.client_memory_peak.unwrap_or(0.0) + memory);
            }
        }

        summary
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn cpu_mean(series: &[UsageSample]) -> f64 {
    series.iter().map(|s| s.cpu_percent).sum::<f64>() / series.len() as f64
}

fn memory_peak(series: &[UsageSample]) -> f64 {
    series.iter().map(|s| s.memory_bytes).max().unwrap_or(0) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn config() -> TestConfiguration {
        TestConfiguration {
            protocol: "sse".into(),
            clients: 2,
            messages: 3,
            payload_bytes: 16,
            repetitions: 2,
            output: PathBuf::from("sse.json"),
        }
    }

    fn sample(subject: SubjectId, cpu: f64, memory: u64) -> UsageSample {
        UsageSample {
            subject_id: subject,
            timestamp_ms: 0,
            cpu_percent: cpu,
            memory_bytes: memory,
        }
    }

    fn run(index: u32, offset: i64, status: RunStatus) -> RunResult {
        let mut latency = BTreeMap::new();
        latency.insert(
            0,
            ClientLatency {
                first_received_at_ms: 1_010 + offset,
                last_received_at_ms: 1_030 + offset,
                received: 3,
                last_seq: 3,
            },
        );
        latency.insert(
            1,
            ClientLatency {
                first_received_at_ms: 1_020 + offset,
                last_received_at_ms: 1_050 + offset,
                received: 3,
                last_seq: 3,
            },
        );

        let mut usage = BTreeMap::new();
        usage.insert(
            SubjectId::server(),
            vec![
                sample(SubjectId::server(), 10.0, 100),
                sample(SubjectId::server(), 30.0, 300),
            ],
        );
        usage.insert(
            SubjectId::browser(0),
            vec![sample(SubjectId::browser(0), 5.0, 50)],
        );
        usage.insert(
            SubjectId::browser(1),
            vec![sample(SubjectId::browser(1), 7.0, 70)],
        );

        RunResult {
            run_id: uuid::Uuid::new_v4(),
            run_index: index,
            config: config(),
            started_at_ms: 0,
            send_started_at_ms: Some(1_000),
            per_client_latency: latency,
            usage_series: usage,
            status,
            incomplete_clients: vec![],
            client_errors: 0,
            rejected_events: 0,
            phase_durations_ms: BTreeMap::new(),
        }
    }

    #[test]
    fn test_metric_stats_basic() {
        let stats = MetricStats::from_values(&[2.0, 4.0, 6.0]).unwrap();
        assert_eq!(stats.mean, 4.0);
        assert_eq!(stats.variance, 4.0);
        assert_eq!(stats.std_dev(), 2.0);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 6.0);
        assert_eq!(stats.samples, 3);
    }

    #[test]
    fn test_metric_stats_single_and_empty() {
        assert!(MetricStats::from_values(&[]).is_none());
        let single = MetricStats::from_values(&[7.5]).unwrap();
        assert_eq!(single.variance, 0.0);
        assert_eq!(single.mean, 7.5);
    }

    #[test]
    fn test_run_summary() {
        let summary = run(0, 0, RunStatus::Complete).summary();
        assert_eq!(summary.mean_time_to_first_ms, Some(15.0));
        assert_eq!(summary.mean_time_to_last_ms, Some(40.0));
        assert_eq!(summary.max_time_to_last_ms, Some(50.0));
        assert_eq!(summary.server_cpu_mean, Some(20.0));
        assert_eq!(summary.server_memory_peak, Some(300.0));
        assert_eq!(summary.client_cpu_mean, Some(12.0));
        assert_eq!(summary.client_memory_peak, Some(120.0));
    }

    #[test]
    fn test_aggregate_excludes_incomplete_runs() {
        let runs = vec![
            run(0, 0, RunStatus::Complete),
            run(1, 10, RunStatus::Complete),
            run(
                2,
                500,
                RunStatus::Incomplete {
                    reason: "drain timeout".into(),
                },
            ),
        ];
        let aggregate = AggregateResult::from_runs(&config(), runs);

        assert_eq!(aggregate.runs.len(), 3);
        assert_eq!(aggregate.complete_runs, 2);
        assert_eq!(aggregate.incomplete_runs, 1);

        let ttf = aggregate.time_to_first_ms.unwrap();
        assert_eq!(ttf.samples, 2);
        assert_eq!(ttf.mean, 20.0);
        assert_eq!(ttf.min, 15.0);
        assert_eq!(ttf.max, 25.0);
    }

    #[test]
    fn test_aggregate_without_complete_runs() {
        let runs = vec![run(
            0,
            0,
            RunStatus::Incomplete {
                reason: "drain timeout".into(),
            },
        )];
        let aggregate = AggregateResult::from_runs(&config(), runs);
        assert_eq!(aggregate.complete_runs, 0);
        assert!(aggregate.time_to_first_ms.is_none());
        assert!(aggregate.server_cpu_percent.is_none());
    }
}
