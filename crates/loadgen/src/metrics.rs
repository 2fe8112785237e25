//! Per-unit results and run aggregation.

use std::time::Duration;

use alloy_primitives::TxHash;
use serde::{Deserialize, Serialize};

/// Final state of one issued unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Included and executed successfully.
    Confirmed,
    /// Included but reverted.
    Reverted,
    /// Rejected by the node at submission.
    SubmitFailed,
    /// Accepted but dropped before inclusion.
    SettlementFailed,
    /// Not settled before the drain window closed.
    TimedOut,
}

/// Outcome of one issued unit. Built once, when the unit settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    /// Transaction hash, absent when submission was rejected.
    pub handle: Option<TxHash>,
    /// Account that issued the unit.
    pub account_index: usize,
    /// Nonce the unit was signed with.
    pub nonce_used: u64,
    /// Milliseconds from run start to send.
    pub send_time_ms: f64,
    /// Milliseconds from run start to settlement.
    pub confirm_time_ms: Option<f64>,
    /// `confirm_time_ms - send_time_ms`.
    pub latency_ms: Option<f64>,
    /// Whether the unit executed successfully.
    pub success: bool,
    /// Final state.
    pub status: WorkStatus,
    /// Error message for failed units.
    pub error: Option<String>,
}

/// Failure counts by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBreakdown {
    /// Rejected at submission.
    pub submission: u64,
    /// Included but reverted.
    pub reverted: u64,
    /// Dropped after acceptance.
    pub settlement: u64,
    /// Still unsettled when the drain window closed.
    pub timed_out: u64,
}

impl ErrorBreakdown {
    /// Counts failures in `results` by status.
    pub fn from_results(results: &[WorkResult]) -> Self {
        let mut breakdown = Self::default();
        for result in results {
            match result.status {
                WorkStatus::Confirmed => {}
                WorkStatus::Reverted => breakdown.reverted += 1,
                WorkStatus::SubmitFailed => breakdown.submission += 1,
                WorkStatus::SettlementFailed => breakdown.settlement += 1,
                WorkStatus::TimedOut => breakdown.timed_out += 1,
            }
        }
        breakdown
    }
}

/// Aggregate statistics of one run. Latencies cover successful units only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Run duration in seconds.
    pub duration_secs: f64,
    /// Units issued, including rejected submissions.
    pub total_issued: u64,
    /// Units settled successfully.
    pub total_confirmed: u64,
    /// Units that failed for any reason.
    pub total_failed: u64,
    /// Mean latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Minimum latency in milliseconds.
    pub min_latency_ms: f64,
    /// Maximum latency in milliseconds.
    pub max_latency_ms: f64,
    /// Median latency in milliseconds.
    pub p50_latency_ms: f64,
    /// 95th percentile latency in milliseconds.
    pub p95_latency_ms: f64,
    /// 99th percentile latency in milliseconds.
    pub p99_latency_ms: f64,
    /// Successfully settled units per second.
    pub confirmed_throughput: f64,
    /// Issued units per second.
    pub send_throughput: f64,
    /// Successful units as a percentage of issued units.
    pub success_rate: f64,
}

/// Nearest-rank percentile of an ascending slice: `sorted[ceil(p / 100 * n) - 1]`,
/// clamped to the slice bounds. Returns `0.0` for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (p / 100.0 * n as f64).ceil() as i64 - 1;
    let index = rank.clamp(0, n as i64 - 1) as usize;
    sorted[index]
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 { numerator / denominator } else { 0.0 }
}

/// Reduces the result log of a run that lasted `duration` into a [`BenchmarkResult`].
///
/// Every entry counts as issued. An empty log yields an all-zero result.
pub fn aggregate(results: &[WorkResult], duration: Duration) -> BenchmarkResult {
    let total_issued = results.len() as u64;
    let mut latencies: Vec<f64> =
        results.iter().filter(|r| r.success).map(|r| r.latency_ms.unwrap_or_default()).collect();
    latencies.sort_by(f64::total_cmp);

    let total_confirmed = latencies.len() as u64;
    let secs = duration.as_secs_f64();

    let (avg, min, max) = match (latencies.first(), latencies.last()) {
        (Some(min), Some(max)) => {
            (latencies.iter().sum::<f64>() / latencies.len() as f64, *min, *max)
        }
        _ => (0.0, 0.0, 0.0),
    };

    BenchmarkResult {
        duration_secs: secs,
        total_issued,
        total_confirmed,
        total_failed: total_issued - total_confirmed,
        avg_latency_ms: avg,
        min_latency_ms: min,
        max_latency_ms: max,
        p50_latency_ms: percentile(&latencies, 50.0),
        p95_latency_ms: percentile(&latencies, 95.0),
        p99_latency_ms: percentile(&latencies, 99.0),
        confirmed_throughput: ratio(total_confirmed as f64, secs),
        send_throughput: ratio(total_issued as f64, secs),
        success_rate: ratio(total_confirmed as f64, total_issued as f64) * 100.0,
    }
}
