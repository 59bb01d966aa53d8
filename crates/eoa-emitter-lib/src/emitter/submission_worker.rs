// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    emitter::{
        account::Account,
        stats::{OperationRecord, Outcome},
    },
    submitter::{
        SubmitterFactory, TRANSFER_GAS_LIMIT, TransactionSubmitter, TransferRequest,
        check_gas_price_multiplier, scale_gas_price,
    },
};
use ethers::types::{Address, U256};
use log::{debug, info, warn};
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::time::Instant;

/// What every tick sends: a fixed value transfer to a fixed recipient.
#[derive(Clone, Debug)]
pub struct TransferPolicy {
    pub recipient: Address,
    pub value: U256,
    pub gas_price_multiplier: f64,
    pub gas_limit: u64,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            recipient: default_recipient(),
            value: U256::from(10_000_000_000u64),
            gas_price_multiplier: 1.2,
            gas_limit: TRANSFER_GAS_LIMIT,
        }
    }
}

impl TransferPolicy {
    pub fn validate(&self) -> anyhow::Result<()> {
        check_gas_price_multiplier(self.gas_price_multiplier)?;
        anyhow::ensure!(
            self.gas_limit >= TRANSFER_GAS_LIMIT,
            "gas limit {} is below the {} a transfer costs",
            self.gas_limit,
            TRANSFER_GAS_LIMIT
        );
        Ok(())
    }
}

/// `0xDEADBEEF...DEADBEEF`, an address nobody holds a key for.
pub fn default_recipient() -> Address {
    let mut bytes = [0u8; 20];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = [0xde, 0xad, 0xbe, 0xef][i % 4];
    }
    Address::from(bytes)
}

/// Shared, read-only inputs of every tick.
pub(crate) struct TickContext {
    pub factory: Arc<dyn SubmitterFactory>,
    pub policy: TransferPolicy,
    pub submit_timeout: Duration,
}

/// A worker and the single account it owns. The slot is moved into the task serving a tick and
/// handed back when the tick completes, so an account is never touched by two ticks at once.
pub struct WorkerSlot {
    index: usize,
    account: Account,
    client: Option<Box<dyn TransactionSubmitter>>,
}

impl WorkerSlot {
    pub fn new(index: usize, account: Account) -> Self {
        Self {
            index,
            account,
            client: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn is_bound(&self) -> bool {
        self.client.is_some()
    }

    /// Builds the client for this worker's account unless it already has one.
    pub fn bind(&mut self, factory: &dyn SubmitterFactory) -> anyhow::Result<()> {
        if self.client.is_none() {
            self.client = Some(factory.connect(self.account.credential())?);
        }
        Ok(())
    }

    pub(crate) async fn tick(
        mut self,
        ctx: Arc<TickContext>,
        scheduled_at: Instant,
    ) -> (WorkerSlot, OperationRecord) {
        let dispatch_delay = scheduled_at.elapsed();
        let started_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let (nonce, outcome, latency) = match self.bind(ctx.factory.as_ref()) {
            Ok(()) => self.submit(&ctx).await,
            Err(e) => (None, Outcome::WorkerInitFailed(format!("{:#}", e)), Duration::ZERO),
        };

        match (&outcome, nonce) {
            (Outcome::Submitted(_), Some(nonce)) => info!(
                "account={:?} result={} nonce={}",
                self.account.address(),
                outcome,
                nonce
            ),
            (_, Some(nonce)) => warn!(
                "account={:?} result={} nonce={}",
                self.account.address(),
                outcome,
                nonce
            ),
            (_, None) => warn!(
                "account={:?} result={} nonce=none",
                self.account.address(),
                outcome
            ),
        }

        let record = OperationRecord {
            worker_index: self.index,
            account: self.account.address(),
            nonce,
            outcome,
            started_at_ms,
            latency,
            dispatch_delay,
        };
        (self, record)
    }

    async fn submit(&mut self, ctx: &TickContext) -> (Option<u64>, Outcome, Duration) {
        let Some(client) = self.client.as_deref() else {
            return (
                None,
                Outcome::WorkerInitFailed("client not bound".to_string()),
                Duration::ZERO,
            );
        };

        let gas_price = match client.gas_price().await {
            Ok(gas_price) => scale_gas_price(gas_price, ctx.policy.gas_price_multiplier),
            Err(e) => {
                debug!("[{:?}] gas price query failed: {:#}", self.account.address(), e);
                return (None, Outcome::GasPriceFailed(format!("{:#}", e)), Duration::ZERO);
            },
        };

        // Consumed whatever the node says about it.
        let nonce = self.account.take_nonce();
        let txn = TransferRequest {
            to: ctx.policy.recipient,
            value: ctx.policy.value,
            gas_price,
            gas_limit: ctx.policy.gas_limit,
            nonce,
        };

        let start = Instant::now();
        let outcome =
            match tokio::time::timeout(ctx.submit_timeout, client.send_transaction(&txn)).await {
                Ok(Ok(hash)) => Outcome::Submitted(hash),
                Ok(Err(e)) => Outcome::Rejected(format!("{:#}", e)),
                Err(_) => Outcome::TimedOut,
            };
        (Some(nonce), outcome, start.elapsed())
    }
}
