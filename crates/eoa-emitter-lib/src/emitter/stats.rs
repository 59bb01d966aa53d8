// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::emitter::ScheduleConfig;
use ethers::types::{Address, TxHash};
use serde::Serialize;
use std::{collections::BTreeMap, fmt, ops::Sub, time::Duration};

/// What happened to a single tick once a worker picked it up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Submitted(TxHash),
    Rejected(String),
    TimedOut,
    /// No nonce was consumed.
    GasPriceFailed(String),
    /// The worker could not build its client. No nonce was consumed.
    WorkerInitFailed(String),
}

impl Outcome {
    pub fn is_submitted(&self) -> bool {
        matches!(self, Outcome::Submitted(_))
    }

    pub fn error(&self) -> Option<String> {
        match self {
            Outcome::Submitted(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Submitted(hash) => write!(f, "{:?}", hash),
            Outcome::Rejected(err) => write!(f, "rejected: {}", err),
            Outcome::TimedOut => write!(f, "timed out"),
            Outcome::GasPriceFailed(err) => write!(f, "gas price unavailable: {}", err),
            Outcome::WorkerInitFailed(err) => write!(f, "client init failed: {}", err),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OperationRecord {
    pub worker_index: usize,
    pub account: Address,
    /// Set whenever a nonce was consumed, independent of the outcome.
    pub nonce: Option<u64>,
    pub outcome: Outcome,
    /// Wall clock start of the tick, in milliseconds since the unix epoch.
    pub started_at_ms: u64,
    /// Time spent in the submission call itself.
    pub latency: Duration,
    /// How long the tick waited between being scheduled and being picked up.
    pub dispatch_delay: Duration,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TxnCounters {
    pub scheduled: u64,
    pub submitted: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub gas_price_failures: u64,
    pub worker_init_failures: u64,
    pub dropped: u64,
    pub unserved: u64,
    pub incomplete: u64,
}

impl TxnCounters {
    pub fn failed(&self) -> u64 {
        self.rejected + self.timed_out + self.gas_price_failures + self.worker_init_failures
    }

    /// Ticks a worker finished, successfully or not.
    pub fn completed(&self) -> u64 {
        self.submitted + self.failed()
    }

    pub fn rate(&self, window: Duration) -> TxnCountersRate {
        let secs = window.as_secs_f64().max(f64::EPSILON);
        TxnCountersRate {
            scheduled: self.scheduled as f64 / secs,
            submitted: self.submitted as f64 / secs,
            failed: self.failed() as f64 / secs,
            dropped: self.dropped as f64 / secs,
        }
    }
}

impl Sub for &TxnCounters {
    type Output = TxnCounters;

    fn sub(self, other: &TxnCounters) -> TxnCounters {
        TxnCounters {
            scheduled: self.scheduled - other.scheduled,
            submitted: self.submitted - other.submitted,
            rejected: self.rejected - other.rejected,
            timed_out: self.timed_out - other.timed_out,
            gas_price_failures: self.gas_price_failures - other.gas_price_failures,
            worker_init_failures: self.worker_init_failures - other.worker_init_failures,
            dropped: self.dropped - other.dropped,
            unserved: self.unserved - other.unserved,
            incomplete: self.incomplete - other.incomplete,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct TxnCountersRate {
    pub scheduled: f64,
    pub submitted: f64,
    pub failed: f64,
    pub dropped: f64,
}

impl fmt::Display for TxnCountersRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scheduled: {:.1} txn/s, submitted: {:.1} txn/s, failed: {:.1} txn/s, dropped: {:.1} txn/s",
            self.scheduled, self.submitted, self.failed, self.dropped
        )
    }
}

/// Upper bounds of the latency buckets, in milliseconds. Anything slower lands in a final
/// open ended bucket.
const LATENCY_BUCKETS_MS: [u64; 14] = [
    1, 2, 5, 10, 20, 50, 100, 200, 500, 1_000, 2_000, 5_000, 10_000, 30_000,
];

#[derive(Clone, Debug)]
pub struct LatencyHistogram {
    counts: Vec<u64>,
    count: u64,
    sum_ms: u64,
    max_ms: u64,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            counts: vec![0; LATENCY_BUCKETS_MS.len() + 1],
            count: 0,
            sum_ms: 0,
            max_ms: 0,
        }
    }
}

impl LatencyHistogram {
    pub fn record(&mut self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let bucket = LATENCY_BUCKETS_MS.partition_point(|bound| *bound < ms);
        self.counts[bucket] += 1;
        self.count += 1;
        self.sum_ms = self.sum_ms.saturating_add(ms);
        self.max_ms = self.max_ms.max(ms);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean_ms(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum_ms as f64 / self.count as f64)
    }

    pub fn max_ms(&self) -> Option<u64> {
        (self.count > 0).then_some(self.max_ms)
    }

    /// Upper bound of the bucket holding the `quantile`, clamped to the largest latency seen.
    pub fn percentile_ms(&self, quantile: f64) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        let rank = ((quantile.clamp(0.0, 1.0) * self.count as f64).ceil() as u64).max(1);
        let mut seen = 0;
        for (index, count) in self.counts.iter().enumerate() {
            seen += count;
            if seen >= rank {
                let bound = LATENCY_BUCKETS_MS.get(index).copied().unwrap_or(self.max_ms);
                return Some(bound.min(self.max_ms));
            }
        }
        Some(self.max_ms)
    }

    pub fn buckets(&self) -> Vec<LatencyBucket> {
        self.counts
            .iter()
            .enumerate()
            .map(|(index, count)| LatencyBucket {
                le_ms: LATENCY_BUCKETS_MS.get(index).copied(),
                count: *count,
            })
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LatencyBucket {
    /// `None` for the open ended bucket.
    pub le_ms: Option<u64>,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FirstFailure {
    /// 1-based position of the failing tick among the ticks this account served.
    pub tick: u64,
    pub nonce: Option<u64>,
    pub error: String,
    /// Wall clock start of the failing tick, in milliseconds since the unix epoch.
    pub at_ms: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct AccountSummary {
    pub worker_index: usize,
    pub address: Address,
    pub first_nonce: Option<u64>,
    pub next_nonce: Option<u64>,
    pub ticks: u64,
    pub submitted: u64,
    pub failed: u64,
    pub first_failure: Option<FirstFailure>,
}

impl AccountSummary {
    fn new(worker_index: usize, address: Address) -> Self {
        Self {
            worker_index,
            address,
            first_nonce: None,
            next_nonce: None,
            ticks: 0,
            submitted: 0,
            failed: 0,
            first_failure: None,
        }
    }

    fn record(&mut self, record: &OperationRecord) {
        self.ticks += 1;
        if let Some(nonce) = record.nonce {
            self.first_nonce.get_or_insert(nonce);
            self.next_nonce = Some(nonce + 1);
        }
        match record.outcome.error() {
            None => self.submitted += 1,
            Some(error) => {
                self.failed += 1;
                if self.first_failure.is_none() {
                    self.first_failure = Some(FirstFailure {
                        tick: self.ticks,
                        nonce: record.nonce,
                        error,
                        at_ms: record.started_at_ms,
                    });
                }
            },
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ScheduleSummary {
    pub rate: u64,
    pub time_unit_ms: u128,
    pub duration_ms: u128,
    pub min_workers: usize,
    pub max_workers: usize,
    pub overrun_policy: String,
    pub arrival: String,
}

impl From<&ScheduleConfig> for ScheduleSummary {
    fn from(config: &ScheduleConfig) -> Self {
        Self {
            rate: config.rate,
            time_unit_ms: config.time_unit.as_millis(),
            duration_ms: config.duration.as_millis(),
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            overrun_policy: format!("{:?}", config.overrun_policy).to_lowercase(),
            arrival: format!("{:?}", config.arrival).to_lowercase(),
        }
    }
}

/// Everything the timed phase produced. Only the executor loop writes to it. Individual
/// operations are folded into counters, histograms and per-account summaries as they complete,
/// so the report stays the same size however long the run is.
#[derive(Clone, Debug)]
pub struct RunReport {
    counters: TxnCounters,
    latency: LatencyHistogram,
    dispatch_delay: LatencyHistogram,
    accounts: BTreeMap<usize, AccountSummary>,
    schedule: ScheduleSummary,
    workers_created: usize,
    elapsed: Duration,
}

impl RunReport {
    pub fn new(config: &ScheduleConfig) -> Self {
        Self {
            counters: TxnCounters::default(),
            latency: LatencyHistogram::default(),
            dispatch_delay: LatencyHistogram::default(),
            accounts: BTreeMap::new(),
            schedule: ScheduleSummary::from(config),
            workers_created: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn record_scheduled(&mut self) {
        self.counters.scheduled += 1;
    }

    pub fn record_dropped(&mut self) {
        self.counters.dropped += 1;
    }

    pub fn record_unserved(&mut self, count: usize) {
        self.counters.unserved += count as u64;
    }

    pub fn record_incomplete(&mut self, count: usize) {
        self.counters.incomplete += count as u64;
    }

    pub fn record(&mut self, record: OperationRecord) {
        match &record.outcome {
            Outcome::Submitted(_) => self.counters.submitted += 1,
            Outcome::Rejected(_) => self.counters.rejected += 1,
            Outcome::TimedOut => self.counters.timed_out += 1,
            Outcome::GasPriceFailed(_) => self.counters.gas_price_failures += 1,
            Outcome::WorkerInitFailed(_) => self.counters.worker_init_failures += 1,
        }
        if record.nonce.is_some() {
            self.latency.record(record.latency);
        }
        self.dispatch_delay.record(record.dispatch_delay);
        self.accounts
            .entry(record.worker_index)
            .or_insert_with(|| AccountSummary::new(record.worker_index, record.account))
            .record(&record);
    }

    pub(crate) fn finish(&mut self, workers_created: usize, elapsed: Duration) {
        self.workers_created = workers_created;
        self.elapsed = elapsed;
    }

    pub fn counters(&self) -> &TxnCounters {
        &self.counters
    }

    pub fn latency(&self) -> &LatencyHistogram {
        &self.latency
    }

    /// Time ticks spent waiting for a worker. Only non-zero for queued ticks.
    pub fn dispatch_delay(&self) -> &LatencyHistogram {
        &self.dispatch_delay
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountSummary> {
        self.accounts.values()
    }

    pub fn account(&self, address: Address) -> Option<&AccountSummary> {
        self.accounts.values().find(|summary| summary.address == address)
    }

    pub fn schedule(&self) -> &ScheduleSummary {
        &self.schedule
    }

    pub fn workers_created(&self) -> usize {
        self.workers_created
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(worker_index: usize, nonce: Option<u64>, outcome: Outcome) -> OperationRecord {
        OperationRecord {
            worker_index,
            account: Address::from_low_u64_be(worker_index as u64 + 1),
            nonce,
            outcome,
            started_at_ms: 1_700_000_000_000 + nonce.unwrap_or(99),
            latency: Duration::from_millis(15),
            dispatch_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_histogram_percentiles() {
        let mut histogram = LatencyHistogram::default();
        assert_eq!(histogram.percentile_ms(0.5), None);
        for _ in 0..90 {
            histogram.record(Duration::from_millis(3));
        }
        for _ in 0..10 {
            histogram.record(Duration::from_millis(150));
        }
        assert_eq!(histogram.count(), 100);
        assert_eq!(histogram.percentile_ms(0.5), Some(5));
        assert_eq!(histogram.percentile_ms(0.9), Some(5));
        assert_eq!(histogram.percentile_ms(0.99), Some(150));
        assert_eq!(histogram.max_ms(), Some(150));
    }

    #[test]
    fn test_histogram_overflow_bucket() {
        let mut histogram = LatencyHistogram::default();
        histogram.record(Duration::from_secs(120));
        assert_eq!(histogram.buckets().last().unwrap().count, 1);
        assert_eq!(histogram.percentile_ms(0.5), Some(120_000));
    }

    #[test]
    fn test_counters_delta_and_rate() {
        let before = TxnCounters {
            scheduled: 10,
            submitted: 8,
            rejected: 1,
            ..Default::default()
        };
        let after = TxnCounters {
            scheduled: 30,
            submitted: 26,
            rejected: 2,
            dropped: 2,
            ..Default::default()
        };
        let delta = &after - &before;
        assert_eq!(delta.scheduled, 20);
        assert_eq!(delta.submitted, 18);
        assert_eq!(delta.failed(), 1);
        let rate = delta.rate(Duration::from_secs(2));
        assert_eq!(rate.submitted, 9.0);
        assert_eq!(rate.dropped, 1.0);
    }

    #[test]
    fn test_first_failure_is_flagged_per_account() {
        let mut report = RunReport::new(&ScheduleConfig::default());
        report.record(record(0, Some(0), Outcome::Submitted(TxHash::zero())));
        report.record(record(0, Some(1), Outcome::Submitted(TxHash::zero())));
        report.record(record(0, Some(2), Outcome::Rejected("nonce too low".into())));
        report.record(record(0, Some(3), Outcome::TimedOut));
        report.record(record(1, None, Outcome::WorkerInitFailed("refused".into())));

        let first = report.account(Address::from_low_u64_be(1)).unwrap();
        assert_eq!(first.submitted, 2);
        assert_eq!(first.failed, 2);
        assert_eq!(first.first_nonce, Some(0));
        assert_eq!(first.next_nonce, Some(4));
        assert_eq!(
            first.first_failure,
            Some(FirstFailure {
                tick: 3,
                nonce: Some(2),
                error: "rejected: nonce too low".into(),
                at_ms: 1_700_000_000_002,
            })
        );

        let second = report.account(Address::from_low_u64_be(2)).unwrap();
        assert_eq!(second.next_nonce, None);
        assert_eq!(second.first_failure.as_ref().unwrap().nonce, None);

        assert_eq!(report.counters().completed(), 5);
        assert_eq!(report.latency().count(), 4);
        assert_eq!(report.dispatch_delay().count(), 5);
    }
}
