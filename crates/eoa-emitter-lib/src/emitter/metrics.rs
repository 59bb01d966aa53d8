// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics for the emitter.
//!
//! Registered in the default registry, so an embedding process can expose or push them.

use crate::emitter::stats::{OperationRecord, Outcome};
use once_cell::sync::Lazy;
use prometheus::{
    Histogram, IntCounter, IntCounterVec, IntGauge, exponential_buckets, register_histogram,
    register_int_counter, register_int_counter_vec, register_int_gauge,
};

pub static EOA_EMITTER_SCHEDULED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "eoa_emitter_scheduled_total",
        "Total number of ticks issued by the arrival process"
    )
    .unwrap()
});

pub static EOA_EMITTER_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "eoa_emitter_submitted_total",
        "Total number of transactions accepted by the node"
    )
    .unwrap()
});

/// Failed ticks, labelled by what went wrong.
pub static EOA_EMITTER_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "eoa_emitter_failed_total",
        "Total number of ticks that did not end in an accepted transaction",
        &["reason"]
    )
    .unwrap()
});

pub static EOA_EMITTER_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "eoa_emitter_dropped_total",
        "Total number of ticks dropped because every worker was busy"
    )
    .unwrap()
});

/// Buckets from 1ms to ~16s.
pub static EOA_EMITTER_SUBMIT_LATENCY_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "eoa_emitter_submit_latency_seconds",
        "Latency of the transaction submission call in seconds",
        exponential_buckets(0.001, 2.0, 15).unwrap()
    )
    .unwrap()
});

pub static EOA_EMITTER_ACTIVE_WORKERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "eoa_emitter_active_workers",
        "Number of workers created so far in the current run"
    )
    .unwrap()
});

pub static EOA_EMITTER_SUBMITTED_TPS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "eoa_emitter_submitted_tps",
        "Submitted transactions per second over the last stats window"
    )
    .unwrap()
});

pub fn record_scheduled() {
    EOA_EMITTER_SCHEDULED.inc();
}

pub fn record_dropped() {
    EOA_EMITTER_DROPPED.inc();
}

pub fn record_operation(record: &OperationRecord) {
    let reason = match &record.outcome {
        Outcome::Submitted(_) => {
            EOA_EMITTER_SUBMITTED.inc();
            None
        },
        Outcome::Rejected(_) => Some("rejected"),
        Outcome::TimedOut => Some("timed_out"),
        Outcome::GasPriceFailed(_) => Some("gas_price"),
        Outcome::WorkerInitFailed(_) => Some("worker_init"),
    };
    if let Some(reason) = reason {
        EOA_EMITTER_FAILED.with_label_values(&[reason]).inc();
    }
    if record.nonce.is_some() {
        EOA_EMITTER_SUBMIT_LATENCY_SECONDS.observe(record.latency.as_secs_f64());
    }
}

pub fn update_active_workers(workers: usize) {
    EOA_EMITTER_ACTIVE_WORKERS.set(workers as i64);
}

pub fn update_submitted_tps(submitted_tps: f64) {
    EOA_EMITTER_SUBMITTED_TPS.set(submitted_tps as i64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, TxHash};
    use std::time::Duration;

    fn record(outcome: Outcome) -> OperationRecord {
        OperationRecord {
            worker_index: 0,
            account: Address::zero(),
            nonce: Some(0),
            outcome,
            started_at_ms: 0,
            latency: Duration::from_millis(20),
            dispatch_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_record_operation() {
        let before = EOA_EMITTER_SUBMITTED.get();
        record_operation(&record(Outcome::Submitted(TxHash::zero())));
        assert!(EOA_EMITTER_SUBMITTED.get() > before);

        let before = EOA_EMITTER_FAILED.with_label_values(&["timed_out"]).get();
        record_operation(&record(Outcome::TimedOut));
        assert!(EOA_EMITTER_FAILED.with_label_values(&["timed_out"]).get() > before);
    }

    #[test]
    fn test_gauges() {
        // Just verify it doesn't panic
        update_active_workers(12);
        update_submitted_tps(2999.7);
        record_scheduled();
        record_dropped();
    }
}
