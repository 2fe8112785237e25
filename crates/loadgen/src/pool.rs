//! Account pool creation and funding.

use alloy_primitives::{Address, U256};
use alloy_signer_local::PrivateKeySigner;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    Account, FundingError, Ledger, LoadConfig, NonceView, PoolError, ResolvedLimits, with_retry,
};

/// A slot that could not be funded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSlot {
    /// Slot position in the requested signer list.
    pub slot: usize,
    /// Address of the unfunded account.
    pub address: Address,
    /// Attempts made.
    pub attempts: u32,
    /// Error of the final attempt.
    pub error: String,
}

/// Result of pool creation.
#[derive(Debug)]
pub struct PoolReport {
    /// Usable accounts, indexed contiguously from zero.
    pub accounts: Vec<Account>,
    /// Slots dropped after exhausting their retries.
    pub failed: Vec<FailedSlot>,
    /// Accounts whose existing balance already covered the funding amount.
    pub reused: usize,
}

#[derive(Debug, Clone, Copy)]
enum SlotOutcome {
    Funded(u64),
    Reused(u64),
}

/// Creates and funds the signing accounts of a run from a single funding identity.
///
/// The funder's pending nonce is read once and then incremented locally; it is only
/// re-read when a funding attempt fails.
#[derive(Debug)]
pub struct PoolManager<'a, L: ?Sized> {
    ledger: &'a L,
    config: &'a LoadConfig,
}

impl<'a, L: Ledger + ?Sized> PoolManager<'a, L> {
    /// Creates a pool manager.
    pub const fn new(ledger: &'a L, config: &'a LoadConfig) -> Self {
        Self { ledger, config }
    }

    /// Funds every signer in `signers` with the configured amount.
    ///
    /// Signers that already hold the funding amount are reused without a transfer.
    /// A slot that fails `funding_retry.max_attempts` times is dropped and reported.
    pub async fn create(
        &self,
        funder: &PrivateKeySigner,
        signers: Vec<PrivateKeySigner>,
        limits: &ResolvedLimits,
        chain_id: u64,
    ) -> Result<PoolReport, PoolError> {
        let funder_address = funder.address();
        let start = self
            .ledger
            .nonce(funder_address, NonceView::Pending)
            .await
            .map_err(|source| PoolError::FunderNonce { address: funder_address, source })?;

        info!(
            %funder_address,
            funder_nonce = start,
            accounts = signers.len(),
            amount = %self.config.funding_amount,
            "Creating account pool"
        );

        // `None` forces a pending read before the next funding transfer.
        let mut funder_nonce = Some(start);
        let mut report = PoolReport { accounts: Vec::new(), failed: Vec::new(), reused: 0 };

        for (slot, signer) in signers.into_iter().enumerate() {
            let address = signer.address();
            let known = funder_nonce;
            let result = with_retry(&self.config.funding_retry, move |attempt| {
                let nonce = if attempt > 1 { None } else { known };
                self.fund_slot(funder, address, nonce, limits, chain_id)
            })
            .await;

            match result {
                Ok((outcome, next_nonce)) => {
                    funder_nonce = Some(next_nonce);
                    let start_nonce = match outcome {
                        SlotOutcome::Funded(nonce) => nonce,
                        SlotOutcome::Reused(nonce) => {
                            report.reused += 1;
                            nonce
                        }
                    };
                    let index = report.accounts.len();
                    debug!(slot, index, %address, start_nonce, "Account ready");
                    report.accounts.push(Account::new(index, signer, start_nonce));
                }
                Err(e) => {
                    funder_nonce = None;
                    warn!(
                        slot,
                        %address,
                        attempts = e.attempts,
                        error = %e.last,
                        "Dropping account slot"
                    );
                    report.failed.push(FailedSlot {
                        slot,
                        address,
                        attempts: e.attempts,
                        error: e.last.to_string(),
                    });
                }
            }
        }

        if report.accounts.is_empty() && !report.failed.is_empty() {
            return Err(PoolError::Empty(report.failed.len()));
        }

        info!(
            ready = report.accounts.len(),
            reused = report.reused,
            failed = report.failed.len(),
            "Account pool created"
        );
        Ok(report)
    }

    async fn fund_slot(
        &self,
        funder: &PrivateKeySigner,
        address: Address,
        funder_nonce: Option<u64>,
        limits: &ResolvedLimits,
        chain_id: u64,
    ) -> Result<(SlotOutcome, u64), FundingError> {
        let nonce = match funder_nonce {
            Some(nonce) => nonce,
            None => {
                let nonce = self.ledger.nonce(funder.address(), NonceView::Pending).await?;
                debug!(nonce, "Resynced funder nonce");
                nonce
            }
        };

        let amount = self.config.funding_amount;
        let balance = self.ledger.balance(address).await?;
        if balance >= amount {
            let start = self.ledger.nonce(address, NonceView::Committed).await?;
            return Ok((SlotOutcome::Reused(start), nonce));
        }

        let top_up = amount - balance.min(amount);
        let submission =
            self.ledger.fund(funder, address, top_up, nonce, limits, chain_id).await?;
        debug!(handle = %submission.handle, %address, nonce, "Funding transfer sent");

        let settlement = self.ledger.await_settlement(submission.handle);
        let settlement = timeout(self.config.funding_timeout, settlement)
            .await
            .map_err(|_| FundingError::Timeout(self.config.funding_timeout))??;
        if !settlement.is_success() {
            return Err(FundingError::Reverted(submission.handle.to_string()));
        }

        let start = self.ledger.nonce(address, NonceView::Committed).await?;
        Ok((SlotOutcome::Funded(start), nonce + 1))
    }
}

/// Total value needed to fund `accounts` accounts with `amount` each.
pub fn required_funding(accounts: usize, amount: U256) -> U256 {
    amount.saturating_mul(U256::from(accounts))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{RetryPolicy, test_utils::MockLedger};

    fn limits() -> ResolvedLimits {
        ResolvedLimits {
            gas_limit: 21_000,
            max_fee_per_gas: 2_000_000_000,
            max_priority_fee_per_gas: 1,
        }
    }

    fn config() -> LoadConfig {
        LoadConfig::default()
            .with_funding_amount(U256::from(1_000))
            .with_funding_retry(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
            })
    }

    #[tokio::test(start_paused = true)]
    async fn test_funds_each_slot_with_local_funder_nonce() {
        let ledger = MockLedger::new();
        let funder = PrivateKeySigner::random();
        ledger.set_nonce(funder.address(), 7);
        let config = config();

        let signers: Vec<_> = (0..3).map(|_| PrivateKeySigner::random()).collect();
        let addresses: Vec<_> = signers.iter().map(|s| s.address()).collect();

        let report =
            PoolManager::new(&ledger, &config).create(&funder, signers, &limits(), 8453).await;
        let report = report.unwrap();

        assert_eq!(report.accounts.len(), 3);
        assert!(report.failed.is_empty());
        assert_eq!(ledger.nonces_from(funder.address()), vec![7, 8, 9]);
        for (i, address) in addresses.iter().enumerate() {
            assert_eq!(ledger.balance_of(*address), U256::from(1_000));
            assert_eq!(report.accounts[i].address(), *address);
            assert_eq!(report.accounts[i].index(), i);
        }

        let funder_reads = ledger
            .nonce_queries()
            .into_iter()
            .filter(|(address, _)| *address == funder.address())
            .count();
        assert_eq!(funder_reads, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_slot_resyncs_funder_and_retries() {
        let ledger = MockLedger::new();
        let funder = PrivateKeySigner::random();
        ledger.fail_next_submits(funder.address(), 1);
        let config = config();

        let report = PoolManager::new(&ledger, &config)
            .create(&funder, vec![PrivateKeySigner::random()], &limits(), 8453)
            .await
            .unwrap();

        assert_eq!(report.accounts.len(), 1);
        let pending_reads = ledger
            .nonce_queries()
            .into_iter()
            .filter(|(address, view)| *address == funder.address() && *view == NonceView::Pending)
            .count();
        assert_eq!(pending_reads, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_dropped_after_max_attempts() {
        let ledger = MockLedger::new();
        let funder = PrivateKeySigner::random();
        ledger.fail_next_submits(funder.address(), 3);
        let config = config();

        let first = PrivateKeySigner::random();
        let dropped = first.address();
        let report = PoolManager::new(&ledger, &config)
            .create(&funder, vec![first, PrivateKeySigner::random()], &limits(), 8453)
            .await
            .unwrap();

        assert_eq!(report.accounts.len(), 1);
        assert_eq!(report.accounts[0].index(), 0);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].address, dropped);
        assert_eq!(report.failed[0].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_after_dropped_slot_resyncs_funder() {
        let ledger = MockLedger::new();
        let funder = PrivateKeySigner::random();
        ledger.set_nonce(funder.address(), 5);
        ledger.fail_next_submits(funder.address(), 3);
        let config = config();

        let signers = vec![PrivateKeySigner::random(), PrivateKeySigner::random()];
        let report = PoolManager::new(&ledger, &config)
            .create(&funder, signers, &limits(), 8453)
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.accounts.len(), 1);
        assert_eq!(ledger.nonces_from(funder.address()), vec![5]);
        // One startup read, one per retry of the dropped slot, one before the next slot.
        let pending_reads = ledger
            .nonce_queries()
            .into_iter()
            .filter(|(address, view)| *address == funder.address() && *view == NonceView::Pending)
            .count();
        assert_eq!(pending_reads, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reuses_funded_account() {
        let ledger = MockLedger::new();
        let funder = PrivateKeySigner::random();
        let cached = PrivateKeySigner::random();
        ledger.set_balance(cached.address(), U256::from(5_000));
        ledger.set_nonce(cached.address(), 12);
        let config = config();

        let pool = PoolManager::new(&ledger, &config);
        let report = pool.create(&funder, vec![cached], &limits(), 8453).await.unwrap();

        assert_eq!(report.reused, 1);
        assert_eq!(report.accounts[0].local_nonce(), 12);
        assert!(ledger.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_every_slot_failing_is_an_error() {
        let ledger = MockLedger::new();
        let funder = PrivateKeySigner::random();
        ledger.fail_next_submits(funder.address(), 100);
        let config = config().with_funding_retry(RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        });

        let result = PoolManager::new(&ledger, &config)
            .create(&funder, vec![PrivateKeySigner::random()], &limits(), 8453)
            .await;
        assert!(matches!(result, Err(PoolError::Empty(1))));
    }

    #[test]
    fn test_required_funding() {
        assert_eq!(required_funding(4, U256::from(25)), U256::from(100));
    }
}
