//! Command line arguments.

use std::{path::PathBuf, time::Duration};

use alloy_primitives::{Address, Bytes, U256, utils::parse_ether};
use base_loadgen::{ConfirmMode, LoadConfig, ResourceLimits, Termination};
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};

use crate::logging::LoggingArgs;

/// Multi-account transaction load generator.
#[derive(Debug, Parser)]
#[command(name = "loadgen", version, about, long_about = None)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) logging: LoggingArgs,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Create and fund accounts from a funder key and save them to a wallets file.
    Setup(SetupArgs),
    /// Run a load test and report latency and throughput.
    Run(RunArgs),
}

/// Node and funder options shared by both subcommands.
#[derive(Debug, Args)]
pub(crate) struct NodeArgs {
    /// JSON-RPC endpoint of the node under test.
    #[arg(long, env = "RPC_URL", default_value = "http://localhost:8545")]
    pub(crate) rpc_url: String,

    /// Private key of the funding account.
    #[arg(long, env = "FUNDER_KEY", hide_env_values = true)]
    pub(crate) funder_key: String,

    /// Receipt polling interval in milliseconds.
    #[arg(long, default_value = "500")]
    pub(crate) poll_interval_ms: u64,
}

#[derive(Debug, Args)]
pub(crate) struct SetupArgs {
    #[command(flatten)]
    pub(crate) node: NodeArgs,

    /// Number of accounts to create.
    #[arg(long, default_value = "10")]
    pub(crate) accounts: usize,

    /// Amount to fund each account with, in ETH.
    #[arg(long, default_value = "0.1", value_parser = parse_eth)]
    pub(crate) fund_amount: U256,

    /// Seed for reproducible account generation.
    #[arg(long)]
    pub(crate) seed: Option<u64>,

    /// Wallets file to write.
    #[arg(long)]
    pub(crate) output: PathBuf,
}

/// How the confirmation step is scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum ConfirmModeArg {
    /// Issue up to the pending cap and settle in the background.
    #[default]
    Async,
    /// Issue one unit per account and wait for it to settle.
    Gated,
}

impl From<ConfirmModeArg> for ConfirmMode {
    fn from(mode: ConfirmModeArg) -> Self {
        match mode {
            ConfirmModeArg::Async => Self::Async,
            ConfirmModeArg::Gated => Self::Gated,
        }
    }
}

/// Report output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    /// Human-readable summary.
    #[default]
    Text,
    /// Full report as JSON.
    Json,
}

#[derive(Debug, Args)]
#[command(group(
    ArgGroup::new("termination").required(true).args(["count", "duration", "value_target"])
))]
pub(crate) struct RunArgs {
    #[command(flatten)]
    pub(crate) node: NodeArgs,

    /// Wallets file written by `setup`. Fresh accounts are created when omitted.
    #[arg(long)]
    pub(crate) wallets: Option<PathBuf>,

    /// Number of accounts to create when no wallets file is given.
    #[arg(long, default_value = "10")]
    pub(crate) accounts: usize,

    /// Stop after issuing this many units.
    #[arg(long)]
    pub(crate) count: Option<u64>,

    /// Stop after this many seconds.
    #[arg(long)]
    pub(crate) duration: Option<u64>,

    /// Stop once every account has sent this much value, in ETH.
    #[arg(long, value_parser = parse_eth)]
    pub(crate) value_target: Option<U256>,

    /// Give up on the value target after this many seconds.
    #[arg(long, default_value = "600", requires = "value_target")]
    pub(crate) value_timeout: u64,

    /// Maximum unsettled units per account.
    #[arg(long, default_value = "4")]
    pub(crate) max_pending: usize,

    /// Confirmation scheduling.
    #[arg(long, value_enum, default_value = "async")]
    pub(crate) confirm_mode: ConfirmModeArg,

    /// Consecutive failures before an account's nonce is re-read from the node.
    #[arg(long, default_value = "3")]
    pub(crate) nonce_refresh_threshold: u32,

    /// Seconds to wait for outstanding units after issuance stops.
    #[arg(long, default_value = "60")]
    pub(crate) drain_timeout: u64,

    /// Amount to fund each fresh account with, in ETH.
    #[arg(long, default_value = "0.1", value_parser = parse_eth)]
    pub(crate) fund_amount: U256,

    /// Value of each unit, in ETH. Transfers default to 0.000001 ETH and calls to zero.
    #[arg(long, value_parser = parse_eth)]
    pub(crate) value: Option<U256>,

    /// Send every unit to this address instead of random recipients.
    #[arg(long, conflicts_with = "call_target")]
    pub(crate) to: Option<Address>,

    /// Call this contract instead of sending plain transfers.
    #[arg(long, requires = "calldata")]
    pub(crate) call_target: Option<Address>,

    /// Hex calldata for `--call-target`.
    #[arg(long)]
    pub(crate) calldata: Option<Bytes>,

    /// Gas limit per unit.
    #[arg(long)]
    pub(crate) gas_limit: Option<u64>,

    /// Max fee per gas in wei. Defaults to twice the node's gas price.
    #[arg(long)]
    pub(crate) max_fee_per_gas: Option<u128>,

    /// Max priority fee per gas in wei.
    #[arg(long)]
    pub(crate) max_priority_fee_per_gas: Option<u128>,

    /// Seed for reproducible accounts and recipients.
    #[arg(long)]
    pub(crate) seed: Option<u64>,

    /// Report output format on stdout.
    #[arg(long = "format", value_enum, default_value = "text")]
    pub(crate) output_format: OutputFormat,

    /// Also write the full report to this JSON file.
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
}

/// Default value of a plain transfer unit, 0.000001 ETH.
pub(crate) const DEFAULT_TRANSFER_VALUE: U256 = U256::from_limbs([1_000_000_000_000, 0, 0, 0]);

impl RunArgs {
    /// Value attached to each transfer unit.
    pub(crate) fn transfer_value(&self) -> U256 {
        self.value.unwrap_or(DEFAULT_TRANSFER_VALUE)
    }

    /// Value attached to each contract call.
    pub(crate) fn call_value(&self) -> U256 {
        self.value.unwrap_or_default()
    }

    /// The termination policy selected on the command line.
    pub(crate) fn termination(&self) -> Termination {
        match (self.count, self.duration, self.value_target) {
            (Some(n), _, _) => Termination::Count(n),
            (_, Some(secs), _) => Termination::Duration(Duration::from_secs(secs)),
            (_, _, Some(per_account)) => Termination::ValueTarget {
                per_account,
                timeout: Duration::from_secs(self.value_timeout),
            },
            // clap requires exactly one of the three.
            (None, None, None) => Termination::Count(0),
        }
    }

    /// Builds the run configuration for `accounts` accounts.
    pub(crate) fn load_config(&self, accounts: usize) -> LoadConfig {
        let defaults = ResourceLimits::default();
        let limits = ResourceLimits {
            gas_limit: self.gas_limit.unwrap_or(defaults.gas_limit),
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self
                .max_priority_fee_per_gas
                .unwrap_or(defaults.max_priority_fee_per_gas),
        };

        let config = LoadConfig::default()
            .with_accounts(accounts)
            .with_termination(self.termination())
            .with_max_pending(self.max_pending)
            .with_confirm_mode(self.confirm_mode.into())
            .with_nonce_refresh_threshold(self.nonce_refresh_threshold)
            .with_drain_timeout(Duration::from_secs(self.drain_timeout))
            .with_funding_amount(self.fund_amount)
            .with_limits(limits);

        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}

fn parse_eth(s: &str) -> Result<U256, String> {
    parse_ether(s).map_err(|e| format!("invalid ETH amount '{s}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;

    fn run_args(args: &[&str]) -> Result<RunArgs, clap::Error> {
        let argv = ["loadgen", "run", "--funder-key", "0x01"].iter().chain(args);
        match Cli::try_parse_from(argv)?.command {
            Commands::Run(args) => Ok(args),
            Commands::Setup(_) => unreachable!(),
        }
    }

    #[test]
    fn test_termination_is_required() {
        assert!(run_args(&[]).is_err());
    }

    #[test]
    fn test_termination_flags_are_exclusive() {
        assert!(run_args(&["--count", "10", "--duration", "5"]).is_err());
    }

    #[test]
    fn test_count_run_config() {
        let args = run_args(&["--count", "100", "--max-pending", "8", "--confirm-mode", "gated"])
            .unwrap();
        let config = args.load_config(5);

        assert_eq!(config.termination, Termination::Count(100));
        assert_eq!(config.accounts, 5);
        assert_eq!(config.max_pending_per_account, 8);
        assert_eq!(config.confirm_mode, ConfirmMode::Gated);
        assert_eq!(config.limits.max_fee_per_gas, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_value_target_in_ether() {
        let args = run_args(&["--value-target", "0.5", "--value-timeout", "30"]).unwrap();
        assert_eq!(
            args.termination(),
            Termination::ValueTarget {
                per_account: U256::from(500_000_000_000_000_000u64),
                timeout: Duration::from_secs(30),
            }
        );
    }

    #[test]
    fn test_call_target_requires_calldata() {
        assert!(run_args(&["--count", "1", "--call-target", &Address::ZERO.to_string()]).is_err());
        let args = run_args(&[
            "--count",
            "1",
            "--call-target",
            &Address::ZERO.to_string(),
            "--calldata",
            "0xd09de08a",
        ])
        .unwrap();
        assert_eq!(args.calldata.unwrap().len(), 4);
    }

    #[test]
    fn test_report_and_log_formats_are_distinct() {
        let cli = Cli::try_parse_from([
            "loadgen",
            "run",
            "--funder-key",
            "0x01",
            "--count",
            "1",
            "--format",
            "json",
            "-v",
            "--log-format",
            "compact",
        ])
        .unwrap();
        assert_eq!(cli.logging.verbosity, 1);
        assert_eq!(cli.logging.format, LogFormat::Compact);
        let Commands::Run(args) = cli.command else { panic!("expected run") };
        assert_eq!(args.output_format, OutputFormat::Json);
    }

    #[test]
    fn test_unit_value_in_ether() {
        let args = run_args(&["--value-target", "0.5", "--value", "0.1"]).unwrap();
        assert_eq!(args.transfer_value(), U256::from(100_000_000_000_000_000u64));
        assert_eq!(args.call_value(), U256::from(100_000_000_000_000_000u64));

        let args = run_args(&["--count", "1"]).unwrap();
        assert_eq!(args.transfer_value(), U256::from(1_000_000_000_000u64));
        assert_eq!(args.call_value(), U256::ZERO);
    }

    #[test]
    fn test_setup_args() {
        let cli = Cli::try_parse_from([
            "loadgen",
            "-v",
            "setup",
            "--funder-key",
            "0x01",
            "--accounts",
            "3",
            "--fund-amount",
            "1",
            "--output",
            "wallets.json",
        ])
        .unwrap();
        assert_eq!(cli.logging.verbosity, 1);
        let Commands::Setup(args) = cli.command else { panic!("expected setup") };
        assert_eq!(args.accounts, 3);
        assert_eq!(args.fund_amount, U256::from(1_000_000_000_000_000_000u64));
    }
}
