//! Run reports.

use std::{fmt, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    AccountSummary, BenchmarkResult, ErrorBreakdown, FailedSlot, LoadConfig, ReportError,
    StopReason, WorkResult, aggregate,
};

/// Everything recorded about one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Configuration the run used.
    pub config: LoadConfig,
    /// Aggregate statistics.
    pub result: BenchmarkResult,
    /// Failure counts by kind.
    pub errors: ErrorBreakdown,
    /// Why issuance stopped.
    pub stop_reason: StopReason,
    /// Seconds spent issuing, drain excluded.
    pub issuing_secs: f64,
    /// Per-account totals.
    pub accounts: Vec<AccountSummary>,
    /// Account slots dropped during funding.
    pub failed_slots: Vec<FailedSlot>,
    /// Accounts whose existing balance was reused.
    pub reused_accounts: usize,
    /// Per-unit results in completion order.
    pub results: Vec<WorkResult>,
}

impl RunReport {
    /// Builds a report from the parts of a finished run.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: LoadConfig,
        results: Vec<WorkResult>,
        accounts: Vec<AccountSummary>,
        failed_slots: Vec<FailedSlot>,
        reused_accounts: usize,
        stop_reason: StopReason,
        issuing: std::time::Duration,
        duration: std::time::Duration,
    ) -> Self {
        Self {
            config,
            result: aggregate(&results, duration),
            errors: ErrorBreakdown::from_results(&results),
            stop_reason,
            issuing_secs: issuing.as_secs_f64(),
            accounts,
            failed_slots,
            reused_accounts,
            results,
        }
    }

    /// Writes the report to `path` as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Reads a report written by [`RunReport::save`].
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Writes `report` to `path` as pretty JSON.
pub fn save_report(report: &RunReport, path: &Path) -> Result<(), ReportError> {
    report.save(path)
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.result;
        writeln!(f, "Run finished: {:?}", self.stop_reason)?;
        writeln!(
            f,
            "  Duration:       {:.2}s ({:.2}s issuing)",
            r.duration_secs, self.issuing_secs
        )?;
        writeln!(
            f,
            "  Units:          {} issued, {} confirmed, {} failed",
            r.total_issued, r.total_confirmed, r.total_failed
        )?;
        writeln!(f, "  Success rate:   {:.2}%", r.success_rate)?;
        writeln!(
            f,
            "  Throughput:     {:.2}/s confirmed, {:.2}/s sent",
            r.confirmed_throughput, r.send_throughput
        )?;
        writeln!(
            f,
            "  Latency (ms):   avg {:.1}, min {:.1}, max {:.1}",
            r.avg_latency_ms, r.min_latency_ms, r.max_latency_ms
        )?;
        writeln!(
            f,
            "  Percentiles:    p50 {:.1}, p95 {:.1}, p99 {:.1}",
            r.p50_latency_ms, r.p95_latency_ms, r.p99_latency_ms
        )?;

        let e = &self.errors;
        writeln!(
            f,
            "  Errors:         {} rejected, {} reverted, {} dropped, {} timed out",
            e.submission, e.reverted, e.settlement, e.timed_out
        )?;

        write!(f, "  Accounts:       {} active", self.accounts.len())?;
        if self.reused_accounts > 0 {
            write!(f, ", {} reused", self.reused_accounts)?;
        }
        if !self.failed_slots.is_empty() {
            write!(f, ", {} dropped during funding", self.failed_slots.len())?;
        }
        writeln!(f)?;

        let resyncs: u32 = self.accounts.iter().map(|a| a.resyncs).sum();
        if resyncs > 0 {
            writeln!(f, "  Nonce resyncs:  {resyncs}")?;
        }
        Ok(())
    }
}
