// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

pub mod account;
pub mod account_generator;
pub mod account_minter;
pub mod metrics;
pub mod stats;
pub mod submission_worker;
#[cfg(test)]
pub(crate) mod testing;

use crate::{
    emitter::{
        account::{AccountPool, AccountSlots},
        stats::{OperationRecord, RunReport, TxnCounters},
        submission_worker::{TickContext, TransferPolicy, WorkerSlot},
    },
    submitter::SubmitterFactory,
};
use again::RetryPolicy;
use anyhow::{Result, ensure};
use clap::ValueEnum;
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::{
    task::{JoinError, JoinSet},
    time::{Instant, MissedTickBehavior, sleep_until},
};

// This retry policy is used for client calls needed to set up the run (balances, nonces,
// chain id, funding receipts). If these fail, the whole run fails. Load transactions are never
// retried.
// This retry policy means an operation will take 8 seconds at most.
pub(crate) static RETRY_POLICY: Lazy<RetryPolicy> = Lazy::new(|| {
    RetryPolicy::exponential(Duration::from_millis(125))
        .with_max_retries(6)
        .with_jitter(true)
});

/// What happens to a tick that arrives while every allowed worker is busy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OverrunPolicy {
    /// Skip the tick and count it as dropped.
    #[default]
    Drop,
    /// Hold the tick until a worker frees up. Ticks still held when the window closes are
    /// counted as unserved.
    Queue,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ArrivalPattern {
    /// Evenly spaced ticks.
    #[default]
    Uniform,
    /// Exponentially distributed gaps with the same mean.
    Poisson,
}

#[derive(Clone, Debug)]
pub struct ScheduleConfig {
    /// Ticks per `time_unit`.
    pub rate: u64,
    pub time_unit: Duration,
    pub duration: Duration,
    /// Workers started and connected before the window opens.
    pub min_workers: usize,
    pub max_workers: usize,
    pub overrun_policy: OverrunPolicy,
    pub arrival: ArrivalPattern,
    /// How long in-flight ticks may run past the end of the window.
    pub drain_timeout: Duration,
    pub submit_timeout: Duration,
    pub stats_interval: Duration,
    /// Seed for the Poisson arrival process.
    pub seed: Option<u64>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            rate: 3000,
            time_unit: Duration::from_secs(1),
            duration: Duration::from_secs(120),
            min_workers: 60,
            max_workers: 60,
            overrun_policy: OverrunPolicy::Drop,
            arrival: ArrivalPattern::Uniform,
            drain_timeout: Duration::from_secs(30),
            submit_timeout: Duration::from_secs(10),
            stats_interval: Duration::from_secs(10),
            seed: None,
        }
    }
}

impl ScheduleConfig {
    pub fn rate(mut self, rate: u64, time_unit: Duration) -> Self {
        self.rate = rate;
        self.time_unit = time_unit;
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn workers(mut self, min_workers: usize, max_workers: usize) -> Self {
        self.min_workers = min_workers;
        self.max_workers = max_workers;
        self
    }

    pub fn overrun_policy(mut self, overrun_policy: OverrunPolicy) -> Self {
        self.overrun_policy = overrun_policy;
        self
    }

    pub fn arrival(mut self, arrival: ArrivalPattern, seed: Option<u64>) -> Self {
        self.arrival = arrival;
        self.seed = seed;
        self
    }

    pub fn drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    pub fn submit_timeout(mut self, submit_timeout: Duration) -> Self {
        self.submit_timeout = submit_timeout;
        self
    }

    pub fn stats_interval(mut self, stats_interval: Duration) -> Self {
        self.stats_interval = stats_interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.rate > 0, "rate must be positive");
        ensure!(!self.time_unit.is_zero(), "time unit must be positive");
        ensure!(self.max_workers > 0, "max workers must be positive");
        ensure!(
            self.min_workers <= self.max_workers,
            "preallocated workers ({}) exceed max workers ({})",
            self.min_workers,
            self.max_workers
        );
        ensure!(!self.submit_timeout.is_zero(), "submit timeout must be positive");
        ensure!(!self.stats_interval.is_zero(), "stats interval must be positive");
        Ok(())
    }

    /// Ticks a uniform schedule issues over the whole window.
    pub fn expected_ticks(&self) -> u64 {
        let ticks =
            self.duration.as_nanos() * self.rate as u128 / self.time_unit.as_nanos().max(1);
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }
}

/// Tick times of the arrival process.
enum ArrivalSchedule {
    Uniform {
        start: Instant,
        time_unit_nanos: u128,
        rate: u128,
        issued: u128,
    },
    Poisson {
        last: Instant,
        mean_gap_secs: f64,
        rng: StdRng,
    },
}

impl ArrivalSchedule {
    fn new(config: &ScheduleConfig, start: Instant) -> Self {
        match config.arrival {
            ArrivalPattern::Uniform => ArrivalSchedule::Uniform {
                start,
                time_unit_nanos: config.time_unit.as_nanos(),
                rate: config.rate as u128,
                issued: 0,
            },
            ArrivalPattern::Poisson => ArrivalSchedule::Poisson {
                last: start,
                mean_gap_secs: config.time_unit.as_secs_f64() / config.rate as f64,
                rng: match config.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                },
            },
        }
    }

    /// Offsets are computed from the start rather than from the previous tick so a late tick
    /// never shifts the ones after it; late ticks simply fire back to back.
    fn next_tick(&mut self) -> Instant {
        match self {
            ArrivalSchedule::Uniform {
                start,
                time_unit_nanos,
                rate,
                issued,
            } => {
                let offset = *time_unit_nanos * *issued / *rate;
                *issued += 1;
                *start + Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX))
            },
            ArrivalSchedule::Poisson {
                last,
                mean_gap_secs,
                rng,
            } => {
                let uniform: f64 = rng.r#gen();
                let gap = -(1.0 - uniform).ln() * *mean_gap_secs;
                *last += Duration::try_from_secs_f64(gap).unwrap_or(Duration::ZERO);
                *last
            },
        }
    }
}

/// Drives the timed phase: issues ticks at the configured arrival rate and hands each one to a
/// worker, creating workers on demand up to the configured maximum.
pub struct RateExecutor {
    factory: Arc<dyn SubmitterFactory>,
    policy: TransferPolicy,
}

impl RateExecutor {
    pub fn new(factory: Arc<dyn SubmitterFactory>, policy: TransferPolicy) -> Self {
        Self { factory, policy }
    }

    pub async fn run(&self, pool: AccountPool, config: &ScheduleConfig) -> Result<RunReport> {
        config.validate()?;
        self.policy.validate()?;
        pool.check_capacity(config.max_workers)?;

        let ctx = Arc::new(TickContext {
            factory: self.factory.clone(),
            policy: self.policy.clone(),
            submit_timeout: config.submit_timeout,
        });
        let mut state = RunState::new(pool.into_slots(), ctx, config);
        state.prestart(config.min_workers)?;

        info!(
            "Starting {} ticks per {:?} for {:?} ({:?} arrival), {} to {} workers, {:?} on overrun",
            config.rate,
            config.time_unit,
            config.duration,
            config.arrival,
            config.min_workers,
            config.max_workers,
            config.overrun_policy
        );
        let start = Instant::now();
        let deadline = start + config.duration;
        let mut arrivals = ArrivalSchedule::new(config, start);
        let mut next_tick = arrivals.next_tick();
        let mut stats_timer =
            tokio::time::interval_at(start + config.stats_interval, config.stats_interval);
        stats_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut prev_counters = TxnCounters::default();

        loop {
            tokio::select! {
                biased;
                Some(joined) = state.in_flight.join_next(), if !state.in_flight.is_empty() => {
                    state.on_tick_done(joined);
                },
                _ = sleep_until(next_tick.min(deadline)) => {
                    if next_tick >= deadline {
                        break;
                    }
                    state.dispatch(next_tick);
                    next_tick = arrivals.next_tick();
                },
                _ = stats_timer.tick() => {
                    let counters = *state.report.counters();
                    let rate = (&counters - &prev_counters).rate(config.stats_interval);
                    prev_counters = counters;
                    metrics::update_submitted_tps(rate.submitted);
                    info!("{}", rate);
                },
            }
        }

        info!(
            "Ran for {:?}, waiting up to {:?} for {} in-flight ticks",
            start.elapsed(),
            config.drain_timeout,
            state.in_flight.len()
        );
        state.drain(config.drain_timeout).await;

        let workers_created = state.workers_created;
        let mut report = state.report;
        report.finish(workers_created, start.elapsed());
        Ok(report)
    }
}

/// Mutable state of one run. Owned by the executor loop alone.
struct RunState {
    ctx: Arc<TickContext>,
    accounts: AccountSlots,
    idle: VecDeque<WorkerSlot>,
    queued: VecDeque<Instant>,
    in_flight: JoinSet<(WorkerSlot, OperationRecord)>,
    workers_created: usize,
    max_workers: usize,
    overrun_policy: OverrunPolicy,
    report: RunReport,
}

impl RunState {
    fn new(accounts: AccountSlots, ctx: Arc<TickContext>, config: &ScheduleConfig) -> Self {
        Self {
            ctx,
            accounts,
            idle: VecDeque::with_capacity(config.max_workers),
            queued: VecDeque::new(),
            in_flight: JoinSet::new(),
            workers_created: 0,
            max_workers: config.max_workers,
            overrun_policy: config.overrun_policy,
            report: RunReport::new(config),
        }
    }

    fn prestart(&mut self, count: usize) -> Result<()> {
        for _ in 0..count {
            let mut slot = self.create_worker()?;
            if let Err(e) = slot.bind(self.ctx.factory.as_ref()) {
                warn!(
                    "Worker {} could not connect before the run, retrying on its first tick: {:#}",
                    slot.index(),
                    e
                );
            }
            self.idle.push_back(slot);
        }
        Ok(())
    }

    fn create_worker(&mut self) -> Result<WorkerSlot> {
        let index = self.workers_created;
        let account = self.accounts.claim(index)?;
        self.workers_created += 1;
        metrics::update_active_workers(self.workers_created);
        debug!("Worker {} bound to {:?}", index, account.address());
        Ok(WorkerSlot::new(index, account))
    }

    fn dispatch(&mut self, scheduled_at: Instant) {
        self.report.record_scheduled();
        metrics::record_scheduled();

        if let Some(slot) = self.idle.pop_front() {
            self.spawn(slot, scheduled_at);
            return;
        }
        if self.workers_created < self.max_workers {
            match self.create_worker() {
                Ok(slot) => {
                    self.spawn(slot, scheduled_at);
                    return;
                },
                Err(e) => error!("Failed to start worker {}: {:#}", self.workers_created, e),
            }
        }
        match self.overrun_policy {
            OverrunPolicy::Drop => {
                self.report.record_dropped();
                metrics::record_dropped();
            },
            OverrunPolicy::Queue => self.queued.push_back(scheduled_at),
        }
    }

    fn spawn(&mut self, slot: WorkerSlot, scheduled_at: Instant) {
        self.in_flight.spawn(slot.tick(self.ctx.clone(), scheduled_at));
    }

    fn on_tick_done(&mut self, joined: Result<(WorkerSlot, OperationRecord), JoinError>) {
        match joined {
            Ok((slot, record)) => {
                metrics::record_operation(&record);
                self.report.record(record);
                match self.queued.pop_front() {
                    Some(scheduled_at) => self.spawn(slot, scheduled_at),
                    None => self.idle.push_back(slot),
                }
            },
            Err(e) => {
                // The worker and its account go down with the task.
                error!("Worker task failed: {}", e);
                self.report.record_incomplete(1);
            },
        }
    }

    async fn drain(&mut self, drain_timeout: Duration) {
        if !self.queued.is_empty() {
            warn!("{} queued ticks were never served", self.queued.len());
            self.report.record_unserved(self.queued.len());
            self.queued.clear();
        }

        let deadline = Instant::now() + drain_timeout;
        while !self.in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, self.in_flight.join_next()).await {
                Ok(Some(joined)) => self.on_tick_done(joined),
                Ok(None) => break,
                Err(_) => {
                    let remaining = self.in_flight.len();
                    warn!(
                        "{} ticks still in flight after {:?}, abandoning them",
                        remaining, drain_timeout
                    );
                    self.in_flight.abort_all();
                    self.report.record_incomplete(remaining);
                    break;
                },
            }
        }
    }
}
