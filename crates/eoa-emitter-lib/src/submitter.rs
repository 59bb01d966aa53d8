// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use ethers::{
    providers::{Http, Middleware, Provider},
    signers::{LocalWallet, Signer},
    types::{
        Address, BlockNumber, TransactionReceipt, TransactionRequest, TxHash, U256,
        transaction::eip2718::TypedTransaction,
    },
};
use url::Url;

/// Gas used by a plain value transfer between externally owned accounts.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// A fully specified value transfer, ready to be signed by the account that owns `nonce`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    pub to: Address,
    pub value: U256,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub nonce: u64,
}

/// Client bound to a single signing key. Everything the emitter needs from a node goes
/// through here, so tests can swap the node out.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync {
    /// Address of the key this client signs with.
    fn address(&self) -> Address;

    async fn gas_price(&self) -> Result<U256>;

    /// `eth_getTransactionCount` at `block`. With [`BlockNumber::Pending`] this is the next
    /// nonce the node will accept, counting transactions still in its pool.
    async fn transaction_count(&self, address: Address, block: BlockNumber) -> Result<u64>;

    async fn balance(&self, address: Address) -> Result<U256>;

    /// Signs and sends the transfer, returning the hash the node reports. No retry.
    async fn send_transaction(&self, txn: &TransferRequest) -> Result<TxHash>;

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>>;
}

pub trait SubmitterFactory: Send + Sync {
    fn connect(&self, signer: &LocalWallet) -> Result<Box<dyn TransactionSubmitter>>;
}

#[derive(Clone, Debug)]
pub struct EthSubmitterFactory {
    url: Url,
    chain_id: u64,
}

impl EthSubmitterFactory {
    pub fn new(url: Url, chain_id: u64) -> Self {
        Self { url, chain_id }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }
}

impl SubmitterFactory for EthSubmitterFactory {
    fn connect(&self, signer: &LocalWallet) -> Result<Box<dyn TransactionSubmitter>> {
        let provider = http_provider(&self.url)?;
        Ok(Box::new(EthSubmitter {
            provider,
            signer: signer.clone().with_chain_id(self.chain_id),
        }))
    }
}

pub(crate) fn http_provider(url: &Url) -> Result<Provider<Http>> {
    Provider::<Http>::try_from(url.as_str())
        .with_context(|| format!("Failed to build JSON-RPC client for {}", url))
}

/// `ethers` backed submitter. Sends legacy transactions through `eth_sendRawTransaction`,
/// signing locally so the node never sees the key.
#[derive(Debug)]
pub struct EthSubmitter {
    provider: Provider<Http>,
    signer: LocalWallet,
}

#[async_trait]
impl TransactionSubmitter for EthSubmitter {
    fn address(&self) -> Address {
        self.signer.address()
    }

    async fn gas_price(&self) -> Result<U256> {
        Ok(self.provider.get_gas_price().await?)
    }

    async fn transaction_count(&self, address: Address, block: BlockNumber) -> Result<u64> {
        let count = self
            .provider
            .get_transaction_count(address, Some(block.into()))
            .await?;
        u256_to_u64(count)
    }

    async fn balance(&self, address: Address) -> Result<U256> {
        Ok(self.provider.get_balance(address, None).await?)
    }

    async fn send_transaction(&self, txn: &TransferRequest) -> Result<TxHash> {
        let request: TypedTransaction = TransactionRequest::new()
            .from(self.signer.address())
            .to(txn.to)
            .value(txn.value)
            .gas(txn.gas_limit)
            .gas_price(txn.gas_price)
            .nonce(txn.nonce)
            .chain_id(self.signer.chain_id())
            .into();
        let signature = self.signer.sign_transaction_sync(&request)?;
        let raw = request.rlp_signed(&signature);
        let pending = self.provider.send_raw_transaction(raw).await?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: TxHash) -> Result<Option<TransactionReceipt>> {
        Ok(self.provider.get_transaction_receipt(hash).await?)
    }
}

pub(crate) fn u256_to_u64(value: U256) -> Result<u64> {
    if value > U256::from(u64::MAX) {
        bail!("value {} does not fit in u64", value);
    }
    Ok(value.low_u64())
}

/// A multiplier that would price transactions at zero (or is not a number) is refused.
pub fn check_gas_price_multiplier(multiplier: f64) -> Result<()> {
    if !multiplier.is_finite() || multiplier <= 0.0 {
        bail!("gas price multiplier must be a positive number, got {}", multiplier);
    }
    Ok(())
}

/// Scales `gas_price` by `multiplier`, rounded to a thousandth of the multiplier.
pub fn scale_gas_price(gas_price: U256, multiplier: f64) -> U256 {
    let per_mille = (multiplier * 1000.0).round().max(0.0) as u64;
    gas_price.saturating_mul(U256::from(per_mille)) / U256::from(1000u64)
}
