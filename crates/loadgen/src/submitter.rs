//! Signs and sends work units.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    Account, Ledger, LedgerError, NonceRecovery, Recovery, ResolvedLimits, SignedUnit, Submission,
    WorkUnit,
};

/// Result of one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The node accepted the unit; the cursor advanced.
    Accepted {
        /// Nonce the unit was signed with.
        nonce: u64,
        /// Node acknowledgement.
        submission: Submission,
    },
    /// The unit was rejected; the cursor did not advance.
    Rejected {
        /// Nonce the unit was signed with.
        nonce: u64,
        /// Rejection reason.
        error: LedgerError,
        /// Recovery decision taken for the account.
        recovery: Recovery,
    },
}

/// Signs units at an account's cursor and sends them to the ledger.
#[derive(Debug)]
pub struct Submitter<L: ?Sized> {
    ledger: Arc<L>,
    limits: ResolvedLimits,
    chain_id: u64,
    recovery: NonceRecovery,
}

impl<L: Ledger + ?Sized> Submitter<L> {
    /// Creates a submitter.
    pub const fn new(
        ledger: Arc<L>,
        limits: ResolvedLimits,
        chain_id: u64,
        recovery: NonceRecovery,
    ) -> Self {
        Self { ledger, limits, chain_id, recovery }
    }

    /// The ledger units are sent to.
    pub const fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Recovery policy applied on failures.
    pub const fn recovery(&self) -> &NonceRecovery {
        &self.recovery
    }

    /// Sends `unit` from `account` at its current cursor.
    ///
    /// On acceptance the cursor and pending count advance. On rejection the cursor is
    /// kept and the recovery policy runs.
    pub async fn send(&self, account: &mut Account, unit: &WorkUnit) -> SendOutcome {
        let nonce = account.local_nonce();
        let signed = SignedUnit::sign(account.signer(), unit, nonce, &self.limits, self.chain_id);
        let result = match signed {
            Ok(signed) => self.ledger.submit(signed).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(submission) => {
                account.record_send(unit.value);
                debug!(
                    account = account.index(),
                    nonce,
                    handle = %submission.handle,
                    pending = account.pending(),
                    "Unit sent"
                );
                SendOutcome::Accepted { nonce, submission }
            }
            Err(error) => {
                account.record_rejected();
                warn!(account = account.index(), nonce, error = %error, "Unit rejected");
                let recovery = self.recovery.on_failure(self.ledger.as_ref(), account).await;
                SendOutcome::Rejected { nonce, error, recovery }
            }
        }
    }

    /// Signs `unit` at the account's cursor and reserves that nonce for a gated send.
    ///
    /// The reservation is released with [`Account::release_rejected`] if the node later
    /// rejects the unit. Signing failures reserve nothing.
    pub fn reserve(
        &self,
        account: &mut Account,
        unit: &WorkUnit,
    ) -> Result<SignedUnit, LedgerError> {
        let nonce = account.local_nonce();
        let signed = SignedUnit::sign(account.signer(), unit, nonce, &self.limits, self.chain_id)?;
        account.record_send(unit.value);
        Ok(signed)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, U256};
    use alloy_signer_local::PrivateKeySigner;

    use super::*;
    use crate::test_utils::{MOCK_CHAIN_ID, MockLedger};

    fn submitter(ledger: &Arc<MockLedger>, threshold: u32) -> Submitter<MockLedger> {
        let limits = ResolvedLimits {
            gas_limit: 21_000,
            max_fee_per_gas: 2_000_000_000,
            max_priority_fee_per_gas: 1,
        };
        Submitter::new(Arc::clone(ledger), limits, MOCK_CHAIN_ID, NonceRecovery::new(threshold))
    }

    fn unit() -> WorkUnit {
        WorkUnit::transfer(Address::repeat_byte(2), U256::from(5))
    }

    #[tokio::test]
    async fn test_accepted_send_advances_cursor() {
        let ledger = Arc::new(MockLedger::new());
        let submitter = submitter(&ledger, 3);
        let mut account = Account::new(0, PrivateKeySigner::random(), 11);

        let first = submitter.send(&mut account, &unit()).await;
        let second = submitter.send(&mut account, &unit()).await;

        assert!(matches!(first, SendOutcome::Accepted { nonce: 11, .. }));
        assert!(matches!(second, SendOutcome::Accepted { nonce: 12, .. }));
        assert_eq!(account.local_nonce(), 13);
        assert_eq!(account.pending(), 2);
        assert_eq!(ledger.nonces_from(account.address()), vec![11, 12]);
    }

    #[tokio::test]
    async fn test_rejected_send_keeps_cursor() {
        let ledger = Arc::new(MockLedger::new());
        let submitter = submitter(&ledger, 3);
        let mut account = Account::new(0, PrivateKeySigner::random(), 4);
        ledger.fail_next_submits(account.address(), 1);

        let outcome = submitter.send(&mut account, &unit()).await;

        assert!(matches!(
            outcome,
            SendOutcome::Rejected { nonce: 4, recovery: Recovery::Keep, .. }
        ));
        assert_eq!(account.local_nonce(), 4);
        assert_eq!(account.pending(), 0);
        assert_eq!(account.consecutive_errors(), 1);
    }

    #[tokio::test]
    async fn test_send_after_threshold_uses_pending_view() {
        let ledger = Arc::new(MockLedger::new());
        let submitter = submitter(&ledger, 3);
        let mut account = Account::new(0, PrivateKeySigner::random(), 4);
        ledger.fail_next_submits(account.address(), 3);
        ledger.set_pending_nonce(account.address(), 20);

        for _ in 0..3 {
            let outcome = submitter.send(&mut account, &unit()).await;
            assert!(matches!(outcome, SendOutcome::Rejected { .. }));
        }
        let outcome = submitter.send(&mut account, &unit()).await;

        assert!(matches!(outcome, SendOutcome::Accepted { nonce: 20, .. }));
        assert_eq!(ledger.nonces_from(account.address()), vec![20]);
    }

    #[test]
    fn test_reserve_advances_cursor() {
        let ledger = Arc::new(MockLedger::new());
        let submitter = submitter(&ledger, 3);
        let mut account = Account::new(0, PrivateKeySigner::random(), 2);

        let signed = submitter.reserve(&mut account, &unit()).unwrap();

        assert_eq!(signed.nonce, 2);
        assert_eq!(account.local_nonce(), 3);
        assert_eq!(account.pending(), 1);
    }
}
