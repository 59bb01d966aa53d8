// Copyright © Aptos Foundation
// SPDX-License-Identifier: Apache-2.0

use crate::{
    emitter::{
        ArrivalPattern, OverrunPolicy, ScheduleConfig, account_generator::DEFAULT_MNEMONIC,
        account_minter::FundingPlan, submission_worker::TransferPolicy,
    },
    submitter::{TRANSFER_GAS_LIMIT, check_gas_price_multiplier},
};
use clap::Parser;
use ethers::types::{Address, U256};
use std::{path::PathBuf, time::Duration};
use url::Url;

#[derive(Clone, Debug, Parser)]
pub struct ClusterArgs {
    /// JSON-RPC endpoint of the node under test
    #[clap(long, env = "RPC_URL", default_value = "http://localhost:10002")]
    pub rpc_url: Url,

    /// BIP-39 mnemonic the load accounts (and, without --funding-key, the funding account) are
    /// derived from
    #[clap(
        long,
        env = "LOADTEST_MNEMONIC",
        default_value = DEFAULT_MNEMONIC,
        hide_env_values = true,
        hide_default_value = true
    )]
    pub mnemonic: String,

    /// Hex private key of the funding account. Defaults to index 0 of the mnemonic.
    #[clap(long, env = "FUNDING_PRIVATE_KEY", hide_env_values = true)]
    pub funding_key: Option<String>,

    /// Derivation index of the first load account
    #[clap(long, env = "FIRST_ACCOUNT_INDEX", default_value_t = 1)]
    pub first_account_index: u32,

    /// Chain id to sign with. Read from the node when not set.
    #[clap(long, env = "CHAIN_ID")]
    pub chain_id: Option<u64>,
}

#[derive(Clone, Debug, Parser)]
pub struct EmitArgs {
    /// Ticks issued per --time-unit
    #[clap(long, env = "RATE", default_value_t = 3000)]
    pub rate: u64,

    #[clap(long, env = "TIME_UNIT", default_value = "1s", value_parser = parse_duration)]
    pub time_unit: Duration,

    /// Length of the timed phase
    #[clap(long, env = "DURATION", default_value = "2m", value_parser = parse_duration)]
    pub duration: Duration,

    /// Workers started before the timed phase
    #[clap(long, env = "PREALLOCATED_VUS", default_value_t = 60)]
    pub preallocated_workers: usize,

    #[clap(long, env = "MAX_VUS", default_value_t = 60)]
    pub max_workers: usize,

    /// Upper bound on funding the accounts
    #[clap(long, env = "SETUP_TIMEOUT", default_value = "1800s", value_parser = parse_duration)]
    pub setup_timeout: Duration,

    /// Accounts to fund. Defaults to --max-workers.
    #[clap(long, env = "ACCOUNTS")]
    pub accounts: Option<usize>,

    /// Wei sent to each account. By default every account gets enough for value and gas of its
    /// share of the expected ticks, at the gas price seen during setup.
    #[clap(long, env = "FUNDING_AMOUNT_WEI", value_parser = parse_wei)]
    pub funding_amount_wei: Option<U256>,

    #[clap(
        long,
        env = "RECIPIENT",
        default_value = "0xDEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF",
        value_parser = parse_address
    )]
    pub recipient: Address,

    /// Value of every load transfer
    #[clap(long, env = "VALUE_WEI", default_value = "10000000000", value_parser = parse_wei)]
    pub value_wei: U256,

    #[clap(
        long,
        env = "GAS_PRICE_MULTIPLIER",
        default_value_t = 1.2,
        value_parser = parse_gas_price_multiplier
    )]
    pub gas_price_multiplier: f64,

    #[clap(long, env = "OVERRUN_POLICY", value_enum, default_value_t = OverrunPolicy::Drop)]
    pub overrun_policy: OverrunPolicy,

    #[clap(long, env = "ARRIVAL", value_enum, default_value_t = ArrivalPattern::Uniform)]
    pub arrival: ArrivalPattern,

    /// Seed for --arrival poisson
    #[clap(long, env = "ARRIVAL_SEED")]
    pub seed: Option<u64>,

    #[clap(long, env = "DRAIN_TIMEOUT", default_value = "30s", value_parser = parse_duration)]
    pub drain_timeout: Duration,

    #[clap(long, env = "SUBMIT_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub submit_timeout: Duration,

    #[clap(long, env = "STATS_INTERVAL", default_value = "10s", value_parser = parse_duration)]
    pub stats_interval: Duration,

    /// Wait for every funding transaction to be included before starting
    #[clap(long, env = "CONFIRM_FUNDING")]
    pub confirm_funding: bool,

    #[clap(long, env = "SUMMARY_PATH", default_value = "summary.json")]
    pub summary_path: PathBuf,
}

impl EmitArgs {
    pub fn num_accounts(&self) -> usize {
        self.accounts.unwrap_or(self.max_workers)
    }

    pub fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig::default()
            .rate(self.rate, self.time_unit)
            .duration(self.duration)
            .workers(self.preallocated_workers, self.max_workers)
            .overrun_policy(self.overrun_policy)
            .arrival(self.arrival, self.seed)
            .drain_timeout(self.drain_timeout)
            .submit_timeout(self.submit_timeout)
            .stats_interval(self.stats_interval)
    }

    /// Ticks are spread over at most `max_workers` accounts, so that is the share each of them
    /// is funded for.
    pub fn funding_plan(&self) -> FundingPlan {
        let num_accounts = self.num_accounts();
        let active_accounts = num_accounts.min(self.max_workers).max(1) as u64;
        FundingPlan {
            num_accounts,
            ticks_per_account: self
                .schedule_config()
                .expected_ticks()
                .div_ceil(active_accounts),
            transfer_value: self.value_wei,
            transfer_gas_limit: TRANSFER_GAS_LIMIT,
            amount_override: self.funding_amount_wei,
            gas_price_multiplier: self.gas_price_multiplier,
            confirm: self.confirm_funding,
            setup_timeout: self.setup_timeout,
        }
    }

    pub fn transfer_policy(&self) -> TransferPolicy {
        TransferPolicy {
            recipient: self.recipient,
            value: self.value_wei,
            gas_price_multiplier: self.gas_price_multiplier,
            gas_limit: TRANSFER_GAS_LIMIT,
        }
    }
}

/// Parses durations such as `500ms`, `30s`, `2m`, `1h` or `1m30s`. A bare number is seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = input.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).map_err(|e| format!("{}: {}", input, e));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(format!("expected a number in duration {:?}", input));
        }
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid number {:?} in duration {:?}", number, input))?;
        let secs = match unit {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            "" => return Err(format!("missing unit after {} in duration {:?}", number, input)),
            other => return Err(format!("unknown unit {:?} in duration {:?}", other, input)),
        };
        let part = Duration::try_from_secs_f64(secs)
            .map_err(|e| format!("{}: {}", input, e))?;
        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration {:?} overflows", input))?;
        rest = tail;
    }
    Ok(total)
}

/// Decimal wei amount. `U256`'s own parser reads hex.
pub fn parse_wei(input: &str) -> Result<U256, String> {
    U256::from_dec_str(input.trim()).map_err(|e| format!("invalid wei amount {:?}: {}", input, e))
}

pub fn parse_gas_price_multiplier(input: &str) -> Result<f64, String> {
    let multiplier: f64 = input
        .trim()
        .parse()
        .map_err(|e| format!("invalid gas price multiplier {:?}: {}", input, e))?;
    check_gas_price_multiplier(multiplier).map_err(|e| e.to_string())?;
    Ok(multiplier)
}

pub fn parse_address(input: &str) -> Result<Address, String> {
    input
        .trim()
        .parse::<Address>()
        .map_err(|e| format!("invalid address {:?}: {}", input, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::submission_worker::default_recipient;

    #[derive(Debug, Parser)]
    struct TestArgs {
        #[clap(flatten)]
        cluster_args: ClusterArgs,
        #[clap(flatten)]
        emit_args: EmitArgs,
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms"), Ok(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("1800"), Ok(Duration::from_secs(1800)));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("-5").is_err());
    }

    #[test]
    fn test_parse_wei_is_decimal() {
        assert_eq!(parse_wei("10000000000"), Ok(U256::from(10_000_000_000u64)));
        assert!(parse_wei("0xff").is_err());
    }

    #[test]
    fn test_defaults_match_the_reference_scenario() {
        let args = TestArgs::try_parse_from(["eoa-emitter"]).unwrap();
        assert_eq!(args.cluster_args.mnemonic, DEFAULT_MNEMONIC);
        assert_eq!(args.cluster_args.first_account_index, 1);

        let emit = args.emit_args;
        let config = emit.schedule_config();
        assert_eq!(config.rate, 3000);
        assert_eq!(config.time_unit, Duration::from_secs(1));
        assert_eq!(config.duration, Duration::from_secs(120));
        assert_eq!((config.min_workers, config.max_workers), (60, 60));
        assert_eq!(config.overrun_policy, OverrunPolicy::Drop);
        assert_eq!(emit.num_accounts(), 60);
        let plan = emit.funding_plan();
        assert_eq!(plan.setup_timeout, Duration::from_secs(1800));
        assert_eq!(plan.amount_override, None);
        // 3000/s for 2m over 60 accounts.
        assert_eq!(plan.ticks_per_account, 6000);
        assert_eq!(plan.transfer_value, U256::from(10_000_000_000u64));

        let policy = emit.transfer_policy();
        assert_eq!(policy.recipient, default_recipient());
        assert_eq!(policy.value, U256::from(10_000_000_000u64));
        assert_eq!(policy.gas_price_multiplier, 1.2);
        assert_eq!(emit.summary_path, PathBuf::from("summary.json"));
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = TestArgs::try_parse_from([
            "eoa-emitter",
            "--rate",
            "50",
            "--time-unit",
            "500ms",
            "--duration",
            "1m30s",
            "--max-workers",
            "8",
            "--preallocated-workers",
            "2",
            "--accounts",
            "10",
            "--overrun-policy",
            "queue",
            "--arrival",
            "poisson",
            "--seed",
            "3",
        ])
        .unwrap();
        let config = args.emit_args.schedule_config();
        assert_eq!(config.rate, 50);
        assert_eq!(config.time_unit, Duration::from_millis(500));
        assert_eq!(config.duration, Duration::from_secs(90));
        assert_eq!((config.min_workers, config.max_workers), (2, 8));
        assert_eq!(config.overrun_policy, OverrunPolicy::Queue);
        assert_eq!(config.arrival, ArrivalPattern::Poisson);
        assert_eq!(config.seed, Some(3));
        assert_eq!(args.emit_args.num_accounts(), 10);
        // 50 per 500ms for 90s is 9000 ticks, served by at most 8 of the 10 accounts.
        assert_eq!(args.emit_args.funding_plan().ticks_per_account, 1125);
    }

    #[test]
    fn test_funding_amount_override() {
        let args =
            TestArgs::try_parse_from(["eoa-emitter", "--funding-amount-wei", "1000"]).unwrap();
        assert_eq!(
            args.emit_args.funding_plan().amount_override,
            Some(U256::from(1000u64))
        );
    }

    #[test]
    fn test_gas_price_multiplier_must_be_positive() {
        assert_eq!(parse_gas_price_multiplier("1.5"), Ok(1.5));
        for bad in ["0", "-1", "NaN", "inf", "abc"] {
            assert!(parse_gas_price_multiplier(bad).is_err(), "{}", bad);
        }
        assert!(
            TestArgs::try_parse_from(["eoa-emitter", "--gas-price-multiplier", "0"]).is_err()
        );
    }
}
