//! Load run configuration.

use std::time::Duration;

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Default gas limit for simple value transfers.
pub const DEFAULT_TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Default funding amount per account: 0.1 ETH.
pub const DEFAULT_FUNDING_AMOUNT: u128 = 100_000_000_000_000_000;

/// Default priority fee: 0.001 gwei.
pub const DEFAULT_PRIORITY_FEE: u128 = 1_000_000;

/// When issuance stops.
///
/// The three modes are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Stop once this many units have been issued across all accounts.
    Count(u64),
    /// Stop once the wall-clock deadline has passed.
    Duration(Duration),
    /// Each account stops once it has sent `per_account` value; the run stops when
    /// every account is complete or `timeout` elapses.
    ValueTarget {
        /// Value each account must send before it is complete.
        per_account: U256,
        /// Global run timeout.
        timeout: Duration,
    },
}

/// How the submitter waits on a unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmMode {
    /// Send, then track settlement in the background.
    #[default]
    Async,
    /// Send and settle as one awaited step per account. Each account has at most one
    /// unit outstanding; other accounts proceed independently.
    Gated,
}

/// Resource limits attached to every submitted unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Gas limit per unit.
    pub gas_limit: u64,
    /// Max fee per gas in wei. Derived from the node's gas price when unset.
    pub max_fee_per_gas: Option<u128>,
    /// Max priority fee per gas in wei.
    pub max_priority_fee_per_gas: u128,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_TRANSFER_GAS_LIMIT,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: DEFAULT_PRIORITY_FEE,
        }
    }
}

impl ResourceLimits {
    /// Returns limits with the max fee resolved against the node's gas price.
    ///
    /// An unset max fee becomes twice the gas price, never below the priority fee.
    pub fn resolve(self, gas_price: u128) -> ResolvedLimits {
        let max_fee = self
            .max_fee_per_gas
            .unwrap_or_else(|| gas_price.saturating_mul(2))
            .max(self.max_priority_fee_per_gas);
        ResolvedLimits {
            gas_limit: self.gas_limit,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
        }
    }
}

/// [`ResourceLimits`] with every fee known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLimits {
    /// Gas limit per unit.
    pub gas_limit: u64,
    /// Max fee per gas in wei.
    pub max_fee_per_gas: u128,
    /// Max priority fee per gas in wei.
    pub max_priority_fee_per_gas: u128,
}

/// Bounded retry schedule: delay before attempt `n + 1` is `min(base_delay * n, max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay unit.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }
}

/// Configuration for a load run.
///
/// Built once, validated with [`LoadConfig::validate`], then shared by reference with
/// the pool manager, the scheduler and the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Number of signing accounts.
    pub accounts: usize,
    /// When issuance stops.
    pub termination: Termination,
    /// Maximum unsettled units per account.
    pub max_pending_per_account: usize,
    /// Value sent to each new account during pool setup.
    pub funding_amount: U256,
    /// Resource limits for submitted units.
    pub limits: ResourceLimits,
    /// Consecutive failures that trigger a resync from the pending nonce view.
    pub nonce_refresh_threshold: u32,
    /// How long to wait for outstanding settlements after issuance stops.
    pub drain_timeout: Duration,
    /// How the submitter waits on each unit.
    pub confirm_mode: ConfirmMode,
    /// Upper bound on the scheduler's sleep when every account is saturated.
    pub idle_backoff: Duration,
    /// Retry schedule for funding transfers.
    pub funding_retry: RetryPolicy,
    /// Settlement timeout for a single funding transfer.
    pub funding_timeout: Duration,
    /// Seed for key generation and recipient selection.
    pub seed: Option<u64>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            accounts: 10,
            termination: Termination::Duration(Duration::from_secs(60)),
            max_pending_per_account: 4,
            funding_amount: U256::from(DEFAULT_FUNDING_AMOUNT),
            limits: ResourceLimits::default(),
            nonce_refresh_threshold: 3,
            drain_timeout: Duration::from_secs(60),
            confirm_mode: ConfirmMode::Async,
            idle_backoff: Duration::from_millis(50),
            funding_retry: RetryPolicy::default(),
            funding_timeout: Duration::from_secs(60),
            seed: None,
        }
    }
}

impl LoadConfig {
    /// Sets the number of accounts.
    pub const fn with_accounts(mut self, n: usize) -> Self {
        self.accounts = n;
        self
    }

    /// Sets the termination mode.
    pub const fn with_termination(mut self, termination: Termination) -> Self {
        self.termination = termination;
        self
    }

    /// Stops after `n` issued units.
    pub const fn with_count(self, n: u64) -> Self {
        self.with_termination(Termination::Count(n))
    }

    /// Stops after `duration` of issuance.
    pub const fn with_duration(self, duration: Duration) -> Self {
        self.with_termination(Termination::Duration(duration))
    }

    /// Stops once each account has sent `per_account` value, or after `timeout`.
    pub const fn with_value_target(self, per_account: U256, timeout: Duration) -> Self {
        self.with_termination(Termination::ValueTarget { per_account, timeout })
    }

    /// Sets the maximum pending units per account.
    pub const fn with_max_pending(mut self, n: usize) -> Self {
        self.max_pending_per_account = n;
        self
    }

    /// Sets the funding amount per account.
    pub const fn with_funding_amount(mut self, amount: U256) -> Self {
        self.funding_amount = amount;
        self
    }

    /// Sets the resource limits.
    pub const fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets the nonce refresh threshold.
    pub const fn with_nonce_refresh_threshold(mut self, n: u32) -> Self {
        self.nonce_refresh_threshold = n;
        self
    }

    /// Sets the drain timeout.
    pub const fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Sets the confirm mode.
    pub const fn with_confirm_mode(mut self, mode: ConfirmMode) -> Self {
        self.confirm_mode = mode;
        self
    }

    /// Sets the idle backoff.
    pub const fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    /// Sets the funding retry policy.
    pub const fn with_funding_retry(mut self, policy: RetryPolicy) -> Self {
        self.funding_retry = policy;
        self
    }

    /// Sets the per-transfer funding timeout.
    pub const fn with_funding_timeout(mut self, timeout: Duration) -> Self {
        self.funding_timeout = timeout;
        self
    }

    /// Sets the random seed.
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Effective pending cap per account for the configured confirm mode.
    pub fn pending_cap(&self) -> usize {
        match self.confirm_mode {
            ConfirmMode::Async => self.max_pending_per_account,
            ConfirmMode::Gated => 1,
        }
    }

    /// Checks that the configuration describes a run that can make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accounts == 0 {
            return Err(ConfigError::NoAccounts);
        }
        if self.max_pending_per_account == 0 {
            return Err(ConfigError::ZeroPending);
        }
        if self.nonce_refresh_threshold == 0 {
            return Err(ConfigError::ZeroRefreshThreshold);
        }
        if self.funding_retry.max_attempts == 0 {
            return Err(ConfigError::ZeroRetryAttempts);
        }
        if self.limits.gas_limit == 0 {
            return Err(ConfigError::ZeroGasLimit);
        }
        match self.termination {
            Termination::Count(0) => {
                Err(ConfigError::InvalidTermination("unit count must be greater than zero".into()))
            }
            Termination::Duration(d) if d.is_zero() => {
                Err(ConfigError::InvalidTermination("duration must be greater than zero".into()))
            }
            Termination::ValueTarget { per_account, .. } if per_account.is_zero() => Err(
                ConfigError::InvalidTermination("per-account value target must be non-zero".into()),
            ),
            Termination::ValueTarget { timeout, .. } if timeout.is_zero() => {
                Err(ConfigError::InvalidTermination("value target timeout must be non-zero".into()))
            }
            _ => Ok(()),
        }
    }
}
