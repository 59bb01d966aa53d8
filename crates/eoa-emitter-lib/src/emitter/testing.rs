// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

//! In-memory node used by the unit tests.

use crate::submitter::{SubmitterFactory, TransactionSubmitter, TransferRequest};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use ethers::{
    signers::{LocalWallet, Signer},
    types::{Address, BlockNumber, TransactionReceipt, TxHash, U256, U64},
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Clone, Debug)]
pub struct SentTransaction {
    pub from: Address,
    pub txn: TransferRequest,
    pub hash: TxHash,
}

#[derive(Default)]
struct MockState {
    gas_price: U256,
    fail_gas_price: bool,
    balances: HashMap<Address, U256>,
    /// Included transactions per account, what `latest` reports.
    transaction_counts: HashMap<Address, u64>,
    failing_sends: HashSet<(Address, u64)>,
    /// Every nonce a send was attempted with, accepted or not.
    attempts: Vec<(Address, u64)>,
    failing_receipts: HashSet<TxHash>,
    send_delay: Duration,
    connect_failures_left: usize,
    connects: usize,
    sent: Vec<SentTransaction>,
}

#[derive(Clone, Default)]
pub struct MockChain {
    state: Arc<Mutex<MockState>>,
}

impl MockChain {
    pub fn new() -> Self {
        let chain = Self::default();
        chain.set_gas_price(U256::from(1_000_000_000u64));
        chain
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_gas_price(&self, gas_price: U256) {
        self.with_state(|state| state.gas_price = gas_price);
    }

    pub fn fail_gas_price(&self, fail: bool) {
        self.with_state(|state| state.fail_gas_price = fail);
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.with_state(|state| state.balances.insert(address, balance));
    }

    pub fn set_transaction_count(&self, address: Address, count: u64) {
        self.with_state(|state| state.transaction_counts.insert(address, count));
    }

    /// Makes the send of `nonce` from `address` fail.
    pub fn fail_send(&self, address: Address, nonce: u64) {
        self.with_state(|state| state.failing_sends.insert((address, nonce)));
    }

    /// The receipt for `hash` reports a reverted transaction.
    pub fn fail_receipts_for(&self, hash: TxHash) {
        self.with_state(|state| state.failing_receipts.insert(hash));
    }

    pub fn set_send_delay(&self, delay: Duration) {
        self.with_state(|state| state.send_delay = delay);
    }

    /// The next `count` connect attempts fail.
    pub fn fail_connects(&self, count: usize) {
        self.with_state(|state| state.connect_failures_left = count);
    }

    pub fn connects(&self) -> usize {
        self.with_state(|state| state.connects)
    }

    pub fn sent(&self) -> Vec<SentTransaction> {
        self.with_state(|state| state.sent.clone())
    }

    /// Nonces `address` tried to send with, in order, including rejected sends.
    pub fn attempted_nonces(&self, address: Address) -> Vec<u64> {
        self.with_state(|state| {
            state
                .attempts
                .iter()
                .filter(|(from, _)| *from == address)
                .map(|(_, nonce)| *nonce)
                .collect()
        })
    }

    pub fn sent_by(&self, address: Address) -> Vec<SentTransaction> {
        self.with_state(|state| {
            state
                .sent
                .iter()
                .filter(|sent| sent.from == address)
                .cloned()
                .collect()
        })
    }
}

impl SubmitterFactory for MockChain {
    fn connect(&self, signer: &LocalWallet) -> Result<Box<dyn TransactionSubmitter>> {
        self.with_state(|state| {
            state.connects += 1;
            if state.connect_failures_left > 0 {
                state.connect_failures_left -= 1;
                bail!("connection refused");
            }
            Ok(())
        })?;
        Ok(Box::new(MockClient {
            chain: self.clone(),
            address: signer.address(),
        }))
    }
}

pub struct MockClient {
    chain: MockChain,
    address: Address,
}

impl MockClient {
    pub fn new(chain: MockChain, address: Address) -> Self {
        Self { chain, address }
    }
}

#[async_trait]
impl TransactionSubmitter for MockClient {
    fn address(&self) -> Address {
        self.address
    }

    async fn gas_price(&self) -> Result<U256> {
        self.chain.with_state(|state| {
            if state.fail_gas_price {
                Err(anyhow!("gas price unavailable"))
            } else {
                Ok(state.gas_price)
            }
        })
    }

    /// Accepted sends stay pending, so they only show up in the `pending` count.
    async fn transaction_count(&self, address: Address, block: BlockNumber) -> Result<u64> {
        self.chain.with_state(|state| {
            let included = state.transaction_counts.get(&address).copied().unwrap_or(0);
            match block {
                BlockNumber::Latest => Ok(included),
                BlockNumber::Pending => Ok(state
                    .sent
                    .iter()
                    .filter(|sent| sent.from == address)
                    .map(|sent| sent.txn.nonce + 1)
                    .fold(included, u64::max)),
                other => bail!("unsupported block tag {:?}", other),
            }
        })
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        Ok(self
            .chain
            .with_state(|state| state.balances.get(&address).copied().unwrap_or_default()))
    }

    async fn send_transaction(&self, txn: &TransferRequest) -> Result<TxHash> {
        let delay = self.chain.with_state(|state| state.send_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let from = self.address;
        self.chain.with_state(|state| {
            state.attempts.push((from, txn.nonce));
            if state.failing_sends.contains(&(from, txn.nonce)) {
                bail!("nonce {} rejected for {:?}", txn.nonce, from);
            }
            let hash = TxHash::from_low_u64_be(state.sent.len() as u64 + 1);
            state.sent.push(SentTransaction {
                from,
                txn: txn.clone(),
                hash,
            });
            Ok(hash)
        })
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>> {
        Ok(self.chain.with_state(|state| {
            state.sent.iter().find(|sent| sent.hash == hash).map(|sent| {
                let status = if state.failing_receipts.contains(&hash) {
                    0u64
                } else {
                    1u64
                };
                TransactionReceipt {
                    transaction_hash: hash,
                    from: sent.from,
                    to: Some(sent.txn.to),
                    status: Some(U64::from(status)),
                    ..Default::default()
                }
            })
        }))
    }
}
