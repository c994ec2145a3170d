//! 延迟统计与回归门禁。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::runner::ExecutionResult;

/// 排序数组上的百分位：下标 `ceil(pct/100 * n) - 1`，截断到 `[0, n-1]`
pub fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let index = ((pct / 100.0 * sorted.len() as f64).ceil() as usize)
        .saturating_sub(1)
        .min(sorted.len() - 1);
    sorted[index]
}

fn round_to_2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLatency {
    pub request_id: String,
    pub request_name: String,
    pub samples: usize,
    pub average: f64,
    pub p95: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub samples: usize,
    pub average: f64,
    pub min: u64,
    pub max: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub per_request: Vec<RequestLatency>,
}

/// 持久化的性能基线
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceBaseline {
    pub average: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    #[serde(default)]
    pub samples: usize,
    pub recorded_at: DateTime<Utc>,
}

impl PerformanceBaseline {
    pub fn from_metrics(metrics: &PerformanceMetrics, recorded_at: DateTime<Utc>) -> Self {
        Self {
            average: metrics.average,
            p50: metrics.p50,
            p95: metrics.p95,
            p99: metrics.p99,
            samples: metrics.samples,
            recorded_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub metrics: PerformanceMetrics,
    pub baseline: Option<PerformanceBaseline>,
    /// p95 相对基线的变化百分比，正数表示变慢
    pub regression_pct: Option<f64>,
    pub threshold_pct: f64,
    pub gate_failed: bool,
    pub baseline_updated: bool,
}

/// 性能实验室
#[derive(Debug, Clone, Copy)]
pub struct PerformanceLab {
    threshold_pct: f64,
}

impl Default for PerformanceLab {
    fn default() -> Self {
        Self { threshold_pct: 20.0 }
    }
}

impl PerformanceLab {
    pub fn new(threshold_pct: f64) -> Self {
        Self { threshold_pct }
    }

    /// 统计未跳过、非故障注入结果的耗时
    pub fn measure(&self, results: &[ExecutionResult]) -> PerformanceMetrics {
        let measured: Vec<&ExecutionResult> = results.iter().filter(|r| r.is_measurable()).collect();
        let mut durations: Vec<u64> = measured.iter().map(|r| r.duration_ms).collect();
        if durations.is_empty() {
            return PerformanceMetrics::default();
        }
        durations.sort_unstable();

        let mut per_request: Vec<RequestLatency> = Vec::new();
        for result in &measured {
            if per_request.iter().any(|r| r.request_id == result.request_id) {
                continue;
            }
            let mut samples: Vec<u64> = measured
                .iter()
                .filter(|r| r.request_id == result.request_id)
                .map(|r| r.duration_ms)
                .collect();
            samples.sort_unstable();
            per_request.push(RequestLatency {
                request_id: result.request_id.clone(),
                request_name: result.request_name.clone(),
                samples: samples.len(),
                average: round_to_2(samples.iter().sum::<u64>() as f64 / samples.len() as f64),
                p95: percentile(&samples, 95.0),
            });
        }

        PerformanceMetrics {
            samples: durations.len(),
            average: round_to_2(durations.iter().sum::<u64>() as f64 / durations.len() as f64),
            min: durations[0],
            max: durations[durations.len() - 1],
            p50: percentile(&durations, 50.0),
            p95: percentile(&durations, 95.0),
            p99: percentile(&durations, 99.0),
            per_request,
        }
    }

    /// 与基线 p95 比较；基线 p95 为 0 时不计算回归
    pub fn compare(
        &self,
        metrics: PerformanceMetrics,
        baseline: Option<PerformanceBaseline>,
    ) -> PerformanceReport {
        let regression_pct = baseline
            .as_ref()
            .filter(|b| b.p95 > 0)
            .map(|b| round_to_2((metrics.p95 as f64 - b.p95 as f64) / b.p95 as f64 * 100.0));
        let gate_failed = regression_pct.is_some_and(|pct| pct > self.threshold_pct);

        PerformanceReport {
            metrics,
            baseline,
            regression_pct,
            threshold_pct: self.threshold_pct,
            gate_failed,
            baseline_updated: false,
        }
    }
}
