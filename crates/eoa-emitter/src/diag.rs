// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use anyhow::{Context, Result, bail};
use eoa_emitter_lib::{BlockNumber, Cluster, ClusterArgs};
use log::info;

pub async fn diag(cluster_args: &ClusterArgs) -> Result<()> {
    let cluster = Cluster::try_from_cluster_args(cluster_args)
        .await
        .context("Failed to build cluster")?;
    let (funding_account, client) = cluster.load_funding_account().await?;

    let gas_price = client.gas_price().await.context("Failed to read gas price")?;
    let balance = client
        .balance(funding_account.address())
        .await
        .context("Failed to read funding account balance")?;
    let included = client
        .transaction_count(funding_account.address(), BlockNumber::Latest)
        .await
        .context("Failed to read funding account nonce")?;

    info!("Endpoint: {} (chain id {})", cluster.url(), cluster.chain_id);
    info!("Gas price: {} wei", gas_price);
    info!(
        "Funding account {:?}: balance {} wei, next nonce {} ({} pending)",
        funding_account.address(),
        balance,
        funding_account.nonce(),
        funding_account.nonce().saturating_sub(included)
    );
    if balance.is_zero() {
        bail!("Funding account {:?} has no balance", funding_account.address());
    }
    info!("Looks good");
    Ok(())
}
