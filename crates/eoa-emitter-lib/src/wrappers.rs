// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    args::{ClusterArgs, EmitArgs},
    cluster::Cluster,
    emitter::{
        RateExecutor, account::Account, account_generator::AccountGenerator,
        account_minter::AccountFunder, stats::RunReport,
    },
    submitter::{SubmitterFactory, TransactionSubmitter},
};
use anyhow::{Context, Result, ensure};
use log::info;
use std::sync::Arc;

pub async fn emit_transactions(
    cluster_args: &ClusterArgs,
    emit_args: &EmitArgs,
) -> Result<RunReport> {
    let cluster = Cluster::try_from_cluster_args(cluster_args)
        .await
        .context("Failed to build cluster")?;
    let (mut funding_account, funding_client) = cluster.load_funding_account().await?;
    run_with_funding_account(
        cluster.factory(),
        &mut funding_account,
        funding_client.as_ref(),
        cluster.generator(),
        emit_args,
    )
    .await
}

/// Setup followed by the timed phase. A setup failure is returned as is (a
/// [`SetupError`](crate::emitter::account_minter::SetupError)) and no load is sent.
pub async fn run_with_funding_account(
    factory: Arc<dyn SubmitterFactory>,
    funding_account: &mut Account,
    funding_client: &dyn TransactionSubmitter,
    generator: &dyn AccountGenerator,
    args: &EmitArgs,
) -> Result<RunReport> {
    let config = args.schedule_config();
    config.validate()?;
    let policy = args.transfer_policy();
    policy.validate()?;
    let plan = args.funding_plan();
    ensure!(
        plan.num_accounts >= config.max_workers,
        "--accounts ({}) must be at least --max-workers ({})",
        plan.num_accounts,
        config.max_workers
    );

    let pool = AccountFunder::new(funding_account, funding_client, generator)
        .create_accounts(&plan)
        .await?;
    info!("Setup done, {} accounts funded", pool.len());

    RateExecutor::new(factory, policy)
        .run(pool, &config)
        .await
}
