// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    ClusterArgs,
    emitter::{
        RETRY_POLICY,
        account::Account,
        account_generator::{MnemonicAccountGenerator, load_funding_credential},
    },
    submitter::{
        EthSubmitterFactory, SubmitterFactory, TransactionSubmitter, http_provider, u256_to_u64,
    },
};
use anyhow::{Context, Result};
use ethers::{
    providers::Middleware,
    signers::{LocalWallet, Signer},
    types::BlockNumber,
};
use log::{info, warn};
use std::sync::Arc;
use url::Url;

/// The node under test and the keys used against it.
#[derive(Debug)]
pub struct Cluster {
    url: Url,
    pub chain_id: u64,
    factory: Arc<EthSubmitterFactory>,
    funding_credential: LocalWallet,
    generator: MnemonicAccountGenerator,
}

impl Cluster {
    pub async fn try_from_cluster_args(args: &ClusterArgs) -> Result<Self> {
        let url = args.rpc_url.clone();
        let provider = http_provider(&url)?;
        let chain_id_from_node = RETRY_POLICY
            .retry(|| provider.get_chainid())
            .await
            .with_context(|| format!("Failed to read chain id from {}", url))
            .and_then(u256_to_u64)?;
        let chain_id = match args.chain_id {
            Some(chain_id) if chain_id != chain_id_from_node => {
                warn!(
                    "Configured chain id {} differs from the one reported by {}: {}",
                    chain_id, url, chain_id_from_node
                );
                chain_id
            },
            Some(chain_id) => chain_id,
            None => chain_id_from_node,
        };

        let generator =
            MnemonicAccountGenerator::new(args.mnemonic.clone(), args.first_account_index);
        let funding_credential = load_funding_credential(args.funding_key.as_deref(), &generator)?
            .with_chain_id(chain_id);
        info!(
            "Connected to {} (chain id {}), funding from {:?}",
            url,
            chain_id,
            funding_credential.address()
        );

        Ok(Self {
            factory: Arc::new(EthSubmitterFactory::new(url.clone(), chain_id)),
            url,
            chain_id,
            funding_credential,
            generator,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn factory(&self) -> Arc<dyn SubmitterFactory> {
        self.factory.clone()
    }

    pub fn generator(&self) -> &MnemonicAccountGenerator {
        &self.generator
    }

    /// The funding account at its next pending nonce, with a client signing as it.
    pub async fn load_funding_account(&self) -> Result<(Account, Box<dyn TransactionSubmitter>)> {
        let client = self.factory.connect(&self.funding_credential)?;
        let address = self.funding_credential.address();
        let nonce = RETRY_POLICY
            .retry(|| client.transaction_count(address, BlockNumber::Pending))
            .await
            .with_context(|| format!("Failed to read nonce of funding account {:?}", address))?;
        Ok((Account::new(self.funding_credential.clone(), nonce), client))
    }
}
