// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! End of run output: a human readable summary and a machine readable `summary.json`.

use crate::emitter::stats::{
    AccountSummary, LatencyBucket, LatencyHistogram, RunReport, ScheduleSummary, TxnCounters,
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::{fmt::Write, fs, path::Path};

#[derive(Debug, Serialize)]
pub struct JsonSummary<'a> {
    pub schedule: &'a ScheduleSummary,
    pub elapsed_ms: u128,
    pub workers_created: usize,
    pub counters: &'a TxnCounters,
    pub submitted_per_sec: f64,
    pub latency: LatencySummary,
    /// Time ticks waited for a free worker.
    pub dispatch_delay: LatencySummary,
    pub accounts: Vec<&'a AccountSummary>,
}

#[derive(Debug, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub mean_ms: Option<f64>,
    pub p50_ms: Option<u64>,
    pub p90_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub buckets: Vec<LatencyBucket>,
}

impl From<&LatencyHistogram> for LatencySummary {
    fn from(histogram: &LatencyHistogram) -> Self {
        Self {
            count: histogram.count(),
            mean_ms: histogram.mean_ms(),
            p50_ms: histogram.percentile_ms(0.5),
            p90_ms: histogram.percentile_ms(0.9),
            p99_ms: histogram.percentile_ms(0.99),
            max_ms: histogram.max_ms(),
            buckets: histogram.buckets(),
        }
    }
}

impl<'a> JsonSummary<'a> {
    pub fn new(report: &'a RunReport) -> Self {
        Self {
            schedule: report.schedule(),
            elapsed_ms: report.elapsed().as_millis(),
            workers_created: report.workers_created(),
            counters: report.counters(),
            submitted_per_sec: report.counters().submitted as f64
                / report.elapsed().as_secs_f64().max(f64::EPSILON),
            latency: LatencySummary::from(report.latency()),
            dispatch_delay: LatencySummary::from(report.dispatch_delay()),
            accounts: report.accounts().collect(),
        }
    }
}

pub fn write_json_summary(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&JsonSummary::new(report))
        .context("Failed to serialize run summary")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn ms(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |ms| format!("{}ms", ms))
}

/// Plain text rendering for stdout.
pub fn text_summary(report: &RunReport) -> String {
    let mut out = String::new();
    let schedule = report.schedule();
    let counters = report.counters();
    let latency = report.latency();
    let elapsed = report.elapsed().as_secs_f64().max(f64::EPSILON);

    // Writing to a String cannot fail.
    let _ = writeln!(
        out,
        "scenario: {} ticks per {}ms for {}ms, {} arrival, {} to {} workers, {} on overrun",
        schedule.rate,
        schedule.time_unit_ms,
        schedule.duration_ms,
        schedule.arrival,
        schedule.min_workers,
        schedule.max_workers,
        schedule.overrun_policy,
    );
    let _ = writeln!(
        out,
        "run: {:.1}s, {} workers created",
        report.elapsed().as_secs_f64(),
        report.workers_created()
    );
    let _ = writeln!(
        out,
        "ticks: {} scheduled, {} submitted ({:.1}/s), {} failed, {} dropped, {} unserved, {} incomplete",
        counters.scheduled,
        counters.submitted,
        counters.submitted as f64 / elapsed,
        counters.failed(),
        counters.dropped,
        counters.unserved,
        counters.incomplete,
    );
    let _ = writeln!(
        out,
        "failures: {} rejected, {} timed out, {} gas price, {} worker init",
        counters.rejected,
        counters.timed_out,
        counters.gas_price_failures,
        counters.worker_init_failures,
    );
    let _ = writeln!(
        out,
        "submit latency: p50 {}, p90 {}, p99 {}, max {}",
        ms(latency.percentile_ms(0.5)),
        ms(latency.percentile_ms(0.9)),
        ms(latency.percentile_ms(0.99)),
        ms(latency.max_ms()),
    );
    if counters.unserved > 0 || report.dispatch_delay().max_ms().unwrap_or(0) > 0 {
        let delay = report.dispatch_delay();
        let _ = writeln!(
            out,
            "dispatch delay: p50 {}, p99 {}, max {}",
            ms(delay.percentile_ms(0.5)),
            ms(delay.percentile_ms(0.99)),
            ms(delay.max_ms()),
        );
    }

    let failing: Vec<&AccountSummary> = report
        .accounts()
        .filter(|account| account.first_failure.is_some())
        .collect();
    if !failing.is_empty() {
        let _ = writeln!(out, "accounts with failures: {}", failing.len());
        for account in failing {
            if let Some(failure) = &account.first_failure {
                let nonce = failure
                    .nonce
                    .map_or_else(|| "none".to_string(), |nonce| nonce.to_string());
                let _ = writeln!(
                    out,
                    "  worker {} {:?}: first failure at tick {} (nonce {}): {}, {} of {} ticks failed",
                    account.worker_index,
                    account.address,
                    failure.tick,
                    nonce,
                    failure.error,
                    account.failed,
                    account.ticks,
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::{
        ScheduleConfig,
        stats::{OperationRecord, Outcome},
    };
    use ethers::types::{Address, TxHash};
    use std::time::Duration;

    fn report() -> RunReport {
        let mut report = RunReport::new(&ScheduleConfig::default());
        let account = Address::from_low_u64_be(9);
        for nonce in 0..4 {
            report.record_scheduled();
            report.record(OperationRecord {
                worker_index: 0,
                account,
                nonce: Some(nonce),
                outcome: if nonce == 1 {
                    Outcome::Rejected("replacement transaction underpriced".into())
                } else {
                    Outcome::Submitted(TxHash::from_low_u64_be(nonce + 1))
                },
                started_at_ms: 0,
                latency: Duration::from_millis(40),
                dispatch_delay: Duration::ZERO,
            });
        }
        report.record_scheduled();
        report.record_dropped();
        report.finish(1, Duration::from_secs(2));
        report
    }

    #[test]
    fn test_text_summary() {
        let text = text_summary(&report());
        assert!(text.contains("ticks: 5 scheduled, 3 submitted (1.5/s), 1 failed, 1 dropped"));
        assert!(text.contains("p50 40ms"));
        assert!(text.contains("first failure at tick 2 (nonce 1)"));
    }

    #[test]
    fn test_json_summary_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        write_json_summary(&report(), &path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["counters"]["submitted"], 3);
        assert_eq!(json["counters"]["dropped"], 1);
        assert_eq!(json["workers_created"], 1);
        assert_eq!(json["schedule"]["overrun_policy"], "drop");
        assert_eq!(json["accounts"][0]["first_failure"]["nonce"], 1);
        assert_eq!(json["accounts"][0]["next_nonce"], 4);
        assert_eq!(json["latency"]["p50_ms"], 40);
        assert_eq!(json["dispatch_delay"]["count"], 4);
        assert_eq!(json["dispatch_delay"]["max_ms"], 0);
    }

    #[test]
    fn test_unwritable_summary_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("summary.json");
        assert!(write_json_summary(&report(), &path).is_err());
    }
}
