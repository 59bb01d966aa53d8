// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    emitter::{
        RETRY_POLICY,
        account::{Account, AccountPool},
        account_generator::AccountGenerator,
    },
    submitter::{TRANSFER_GAS_LIMIT, TransactionSubmitter, TransferRequest, scale_gas_price},
};
use ethers::{
    signers::Signer,
    types::{Address, BlockNumber, TxHash, U64, U256},
};
use futures::future::try_join_all;
use log::{debug, info};
use std::time::Duration;
use thiserror::Error;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Setup failures. Any of these aborts the run before the timed phase starts.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("setup did not finish within {0:?}")]
    Timeout(Duration),
    #[error(
        "source ({address:?}) doesn't have enough coins, balance {balance} < needed {required} to fund {accounts} accounts"
    )]
    InsufficientBalance {
        address: Address,
        balance: U256,
        required: U256,
        accounts: usize,
    },
    #[error("failed to derive account {index}: {cause:#}")]
    Derivation { index: usize, cause: anyhow::Error },
    #[error("failed to fund account {index} ({address:?}) with source nonce {nonce}: {cause:#}")]
    Funding {
        index: usize,
        address: Address,
        nonce: u64,
        cause: anyhow::Error,
    },
    #[error("funding transaction {hash:?} for {address:?} failed on chain")]
    FundingReverted { hash: TxHash, address: Address },
    #[error("failed to query {what}: {cause:#}")]
    Query { what: String, cause: anyhow::Error },
}

#[derive(Clone, Debug)]
pub struct FundingPlan {
    pub num_accounts: usize,
    /// Most ticks a single account is expected to serve over the run.
    pub ticks_per_account: u64,
    /// Value and gas limit of each of those ticks' transfers.
    pub transfer_value: U256,
    pub transfer_gas_limit: u64,
    /// Fixed amount per account, replacing the one derived from the expected load.
    pub amount_override: Option<U256>,
    pub gas_price_multiplier: f64,
    /// Wait for every funding transaction to land before returning.
    pub confirm: bool,
    pub setup_timeout: Duration,
}

impl FundingPlan {
    /// What each account receives: enough to pay value and gas for its share of the run at
    /// `gas_price`, unless overridden.
    pub fn amount_per_account(&self, gas_price: U256) -> U256 {
        if let Some(amount) = self.amount_override {
            return amount;
        }
        let per_txn = self
            .transfer_value
            .saturating_add(gas_price.saturating_mul(U256::from(self.transfer_gas_limit)));
        per_txn.saturating_mul(U256::from(self.ticks_per_account))
    }

    /// Total the source must hold: every account's amount plus the gas for its funding transfer.
    pub fn required_balance(&self, gas_price: U256) -> U256 {
        let per_account = self
            .amount_per_account(gas_price)
            .saturating_add(gas_price.saturating_mul(U256::from(TRANSFER_GAS_LIMIT)));
        per_account.saturating_mul(U256::from(self.num_accounts))
    }
}

/// Funds the load accounts from a single source account.
///
/// Funding transfers are sent one after the other from the source's own nonce sequence, so the
/// source nonce only ever moves forward by one per transfer and never has two owners.
pub struct AccountFunder<'t> {
    source_account: &'t mut Account,
    source_client: &'t dyn TransactionSubmitter,
    generator: &'t dyn AccountGenerator,
}

impl<'t> AccountFunder<'t> {
    pub fn new(
        source_account: &'t mut Account,
        source_client: &'t dyn TransactionSubmitter,
        generator: &'t dyn AccountGenerator,
    ) -> Self {
        Self {
            source_account,
            source_client,
            generator,
        }
    }

    /// Derives and funds `plan.num_accounts` accounts, bounded by `plan.setup_timeout`.
    /// Either every account gets funded or the whole setup fails.
    pub async fn create_accounts(&mut self, plan: &FundingPlan) -> Result<AccountPool, SetupError> {
        let setup_timeout = plan.setup_timeout;
        match tokio::time::timeout(setup_timeout, self.fund_accounts(plan)).await {
            Ok(result) => result,
            Err(_) => Err(SetupError::Timeout(setup_timeout)),
        }
    }

    async fn fund_accounts(&mut self, plan: &FundingPlan) -> Result<AccountPool, SetupError> {
        let client = self.source_client;
        let source_address = self.source_account.address();

        let gas_price = RETRY_POLICY
            .retry(|| client.gas_price())
            .await
            .map_err(|cause| SetupError::Query {
                what: "gas price".to_string(),
                cause,
            })?;
        let gas_price = scale_gas_price(gas_price, plan.gas_price_multiplier);
        let balance = RETRY_POLICY
            .retry(|| client.balance(source_address))
            .await
            .map_err(|cause| SetupError::Query {
                what: format!("balance of {:?}", source_address),
                cause,
            })?;
        let amount = plan.amount_per_account(gas_price);
        let required = plan.required_balance(gas_price);
        if balance < required {
            return Err(SetupError::InsufficientBalance {
                address: source_address,
                balance,
                required,
                accounts: plan.num_accounts,
            });
        }
        info!(
            "Funding {} accounts with {} wei each from {:?} (balance {}, gas price {})",
            plan.num_accounts, amount, source_address, balance, gas_price
        );
        if plan.amount_override.is_none() {
            info!(
                "    because of expecting {} txns per account of {} wei and {} gas",
                plan.ticks_per_account, plan.transfer_value, plan.transfer_gas_limit
            );
        }

        let mut accounts = Vec::with_capacity(plan.num_accounts);
        let mut funding_txns = Vec::with_capacity(plan.num_accounts);
        for index in 0..plan.num_accounts {
            let credential = self
                .generator
                .credential(index)
                .map_err(|cause| SetupError::Derivation { index, cause })?;
            let address = credential.address();
            let start_nonce = RETRY_POLICY
                .retry(|| client.transaction_count(address, BlockNumber::Pending))
                .await
                .map_err(|cause| SetupError::Query {
                    what: format!("nonce of {:?}", address),
                    cause,
                })?;

            let nonce = self.source_account.take_nonce();
            let txn = TransferRequest {
                to: address,
                value: amount,
                gas_price,
                gas_limit: TRANSFER_GAS_LIMIT,
                nonce,
            };
            let hash = client
                .send_transaction(&txn)
                .await
                .map_err(|cause| SetupError::Funding {
                    index,
                    address,
                    nonce,
                    cause,
                })?;
            debug!(
                "Funded account {} ({:?}) with source nonce {}, txn {:?}",
                index, address, nonce, hash
            );
            funding_txns.push((hash, address));
            accounts.push(Account::new(credential, start_nonce));
        }
        info!(
            "Sent {} funding transactions, source nonce is now {}",
            funding_txns.len(),
            self.source_account.nonce()
        );

        if plan.confirm {
            try_join_all(
                funding_txns
                    .iter()
                    .map(|(hash, address)| wait_for_receipt(client, *hash, *address)),
            )
            .await?;
            info!("All {} funding transactions confirmed", funding_txns.len());
        }

        Ok(AccountPool::new(accounts))
    }
}

async fn wait_for_receipt(
    client: &dyn TransactionSubmitter,
    hash: TxHash,
    address: Address,
) -> Result<(), SetupError> {
    loop {
        let receipt = RETRY_POLICY
            .retry(|| client.transaction_receipt(hash))
            .await
            .map_err(|cause| SetupError::Query {
                what: format!("receipt of {:?}", hash),
                cause,
            })?;
        match receipt {
            Some(receipt) if receipt.status == Some(U64::from(0u64)) => {
                return Err(SetupError::FundingReverted { hash, address });
            },
            Some(_) => return Ok(()),
            None => tokio::time::sleep(RECEIPT_POLL_INTERVAL).await,
        }
    }
}
