// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

mod diag;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eoa_emitter_lib::{
    ClusterArgs, EmitArgs, SetupError, emit_transactions, text_summary, write_json_summary,
};
use log::{error, info};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: EmitterCommand,
}

#[derive(Subcommand, Debug)]
enum EmitterCommand {
    /// Fund a pool of accounts, then send transfers from them at a constant arrival rate,
    /// writing a summary at the end.
    EmitTx(EmitTx),

    /// Check that the node answers and the funding account is usable, without sending anything.
    Diag(Diag),
}

#[derive(Parser, Debug)]
struct EmitTx {
    #[clap(flatten)]
    cluster_args: ClusterArgs,

    #[clap(flatten)]
    emit_args: EmitArgs,
}

#[derive(Parser, Debug)]
struct Diag {
    #[clap(flatten)]
    cluster_args: ClusterArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match args.command {
        EmitterCommand::EmitTx(args) => emit_tx(args).await,
        EmitterCommand::Diag(args) => diag::diag(&args.cluster_args).await,
    }
}

async fn emit_tx(args: EmitTx) -> Result<()> {
    let report = match emit_transactions(&args.cluster_args, &args.emit_args).await {
        Ok(report) => report,
        Err(e) => {
            if let Some(setup_error) = e.downcast_ref::<SetupError>() {
                error!("Setup failed, no load was sent: {}", setup_error);
            }
            return Err(e);
        },
    };

    println!("{}", text_summary(&report));

    let path = &args.emit_args.summary_path;
    match write_json_summary(&report, path) {
        Ok(()) => {
            info!("Wrote summary to {}", path.display());
            Ok(())
        },
        Err(e) => {
            error!("{:#}", e);
            Err(e).context("Run finished but its summary could not be saved")
        },
    }
}
