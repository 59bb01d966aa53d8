// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

mod args;
mod cluster;
pub mod emitter;
pub mod report;
mod submitter;
mod wrappers;

pub use args::{ClusterArgs, EmitArgs, parse_duration};
pub use cluster::Cluster;
pub use emitter::{
    ArrivalPattern, OverrunPolicy, RateExecutor, ScheduleConfig,
    account::{Account, AccountPool},
    account_minter::{AccountFunder, FundingPlan, SetupError},
    stats::{RunReport, TxnCounters},
    submission_worker::TransferPolicy,
};
pub use ethers::types::BlockNumber;
pub use report::{text_summary, write_json_summary};
pub use submitter::{
    EthSubmitter, EthSubmitterFactory, SubmitterFactory, TransactionSubmitter, TransferRequest,
};
pub use wrappers::{emit_transactions, run_with_funding_account};
