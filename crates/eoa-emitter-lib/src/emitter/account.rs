// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Result, anyhow, ensure};
use ethers::{
    signers::{LocalWallet, Signer},
    types::Address,
};

/// An externally owned account with a locally tracked nonce.
///
/// The nonce is never re-read from the chain once the account has been created; every
/// transaction the account signs takes the current value and advances it by one, whether or
/// not the node accepts it.
#[derive(Debug)]
pub struct Account {
    address: Address,
    credential: LocalWallet,
    nonce: u64,
}

impl Account {
    pub fn new(credential: LocalWallet, nonce: u64) -> Self {
        Self {
            address: credential.address(),
            credential,
            nonce,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn credential(&self) -> &LocalWallet {
        &self.credential
    }

    /// Next nonce this account will sign with.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn take_nonce(&mut self) -> u64 {
        let nonce = self.nonce;
        self.nonce += 1;
        nonce
    }
}

/// Account serving the worker with the given index. Workers and accounts are paired one to one
/// and this is the only place that pairing is decided.
pub fn account_for(worker_index: usize) -> usize {
    worker_index
}

/// Funded accounts in creation order. The pool never grows or shrinks after setup.
#[derive(Debug, Default)]
pub struct AccountPool {
    accounts: Vec<Account>,
}

impl AccountPool {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self { accounts }
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Account> {
        self.accounts.get(index)
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.accounts.iter().map(Account::address).collect()
    }

    pub fn check_capacity(&self, max_workers: usize) -> Result<()> {
        ensure!(
            self.accounts.len() >= max_workers,
            "Account pool has {} accounts but up to {} workers may run, each needs its own account",
            self.accounts.len(),
            max_workers
        );
        Ok(())
    }

    /// Hands the accounts over to workers. Each account can be claimed exactly once.
    pub fn into_slots(self) -> AccountSlots {
        AccountSlots {
            slots: self.accounts.into_iter().map(Some).collect(),
        }
    }
}

#[derive(Debug)]
pub struct AccountSlots {
    slots: Vec<Option<Account>>,
}

impl AccountSlots {
    pub fn claim(&mut self, worker_index: usize) -> Result<Account> {
        let index = account_for(worker_index);
        let pool_size = self.slots.len();
        let slot = self.slots.get_mut(index).ok_or_else(|| {
            anyhow!(
                "No account {} for worker {}, pool size is {}",
                index,
                worker_index,
                pool_size
            )
        })?;
        slot.take()
            .ok_or_else(|| anyhow!("Account {} is already bound to a worker", index))
    }

    pub fn unclaimed(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}
