//! Signing accounts and their local issuance state.

use alloy_primitives::{Address, U256};
use alloy_signer_local::PrivateKeySigner;
use serde::{Deserialize, Serialize};

/// One funded signing identity.
///
/// `local_nonce` is the next nonce this engine intends to use, which may run ahead of
/// the ledger's view. Mutated only on send and on settlement, both by the scheduler.
#[derive(Debug, Clone)]
pub struct Account {
    index: usize,
    signer: PrivateKeySigner,
    address: Address,
    local_nonce: u64,
    pending: usize,
    peak_pending: usize,
    consecutive_errors: u32,
    cumulative_value_sent: U256,
    in_flight_value: U256,
    complete: bool,
    issued: u64,
    confirmed: u64,
    failed: u64,
    resyncs: u32,
}

impl Account {
    /// Creates an account whose cursor starts at `start_nonce`.
    pub fn new(index: usize, signer: PrivateKeySigner, start_nonce: u64) -> Self {
        let address = signer.address();
        Self {
            index,
            signer,
            address,
            local_nonce: start_nonce,
            pending: 0,
            peak_pending: 0,
            consecutive_errors: 0,
            cumulative_value_sent: U256::ZERO,
            in_flight_value: U256::ZERO,
            complete: false,
            issued: 0,
            confirmed: 0,
            failed: 0,
            resyncs: 0,
        }
    }

    /// Position of this account in the pool.
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Signing identity.
    pub const fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    /// Account address.
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Next nonce to use.
    pub const fn local_nonce(&self) -> u64 {
        self.local_nonce
    }

    /// Units issued and not yet settled.
    pub const fn pending(&self) -> usize {
        self.pending
    }

    /// Highest pending count observed.
    pub const fn peak_pending(&self) -> usize {
        self.peak_pending
    }

    /// Failures since the last success or resync.
    pub const fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Value carried by successfully settled units.
    pub const fn cumulative_value_sent(&self) -> U256 {
        self.cumulative_value_sent
    }

    /// Value carried by units still in flight.
    pub const fn in_flight_value(&self) -> U256 {
        self.in_flight_value
    }

    /// Whether the account reached its value target.
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Number of resyncs from the pending nonce view.
    pub const fn resyncs(&self) -> u32 {
        self.resyncs
    }

    /// Returns `true` if the account may issue another unit under `cap`.
    pub const fn is_eligible(&self, cap: usize) -> bool {
        !self.complete && self.pending < cap
    }

    /// Records an accepted send at the current cursor.
    pub(crate) fn record_send(&mut self, value: U256) {
        self.local_nonce += 1;
        self.pending += 1;
        self.peak_pending = self.peak_pending.max(self.pending);
        self.in_flight_value = self.in_flight_value.saturating_add(value);
        self.issued += 1;
    }

    /// Records a send rejected before acceptance. The cursor is left untouched.
    pub(crate) fn record_rejected(&mut self) {
        self.issued += 1;
        self.failed += 1;
    }

    /// Undoes a reserved send whose submission was rejected, restoring the cursor to
    /// the reserved nonce. Only valid while it is the sole unit in flight.
    pub(crate) fn release_rejected(&mut self, nonce: u64, value: U256) {
        debug_assert_eq!(self.pending, 1);
        self.local_nonce = nonce;
        self.pending -= 1;
        self.in_flight_value = self.in_flight_value.saturating_sub(value);
        self.failed += 1;
    }

    /// Records a settled unit carrying `value`.
    ///
    /// On success, `target` (value mode only) re-evaluates completion.
    pub(crate) fn record_settled(&mut self, success: bool, value: U256, target: Option<U256>) {
        self.pending = self.pending.saturating_sub(1);
        self.in_flight_value = self.in_flight_value.saturating_sub(value);
        if success {
            self.confirmed += 1;
            self.consecutive_errors = 0;
            self.cumulative_value_sent = self.cumulative_value_sent.saturating_add(value);
            if let Some(target) = target {
                self.complete = self.cumulative_value_sent >= target;
            }
        } else {
            self.failed += 1;
        }
    }

    /// Records one more failure toward the resync threshold.
    pub(crate) const fn record_error(&mut self) -> u32 {
        self.consecutive_errors += 1;
        self.consecutive_errors
    }

    /// Overwrites the cursor with the ledger's pending-view nonce.
    pub(crate) const fn resync(&mut self, nonce: u64) {
        self.local_nonce = nonce;
        self.consecutive_errors = 0;
        self.resyncs += 1;
    }

    /// Per-account summary for reports.
    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            index: self.index,
            address: self.address,
            issued: self.issued,
            confirmed: self.confirmed,
            failed: self.failed,
            resyncs: self.resyncs,
            final_nonce: self.local_nonce,
            peak_pending: self.peak_pending,
            value_sent: self.cumulative_value_sent,
            complete: self.complete,
        }
    }
}

/// Per-account totals at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    /// Position in the pool.
    pub index: usize,
    /// Account address.
    pub address: Address,
    /// Units issued, including rejected sends.
    pub issued: u64,
    /// Units settled successfully.
    pub confirmed: u64,
    /// Units rejected, reverted or dropped.
    pub failed: u64,
    /// Resyncs from the pending nonce view.
    pub resyncs: u32,
    /// Local cursor at the end of the run.
    pub final_nonce: u64,
    /// Highest pending count observed.
    pub peak_pending: usize,
    /// Value carried by successful units.
    pub value_sent: U256,
    /// Whether the account reached its value target.
    pub complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_and_settle_cycle() {
        let mut account = Account::new(0, PrivateKeySigner::random(), 5);
        account.record_send(U256::from(10));
        account.record_send(U256::from(10));
        assert_eq!(account.local_nonce(), 7);
        assert_eq!(account.pending(), 2);
        assert!(!account.is_eligible(2));

        account.record_error();
        account.record_settled(true, U256::from(10), None);
        assert_eq!(account.pending(), 1);
        assert_eq!(account.consecutive_errors(), 0);
        assert_eq!(account.cumulative_value_sent(), U256::from(10));
        assert_eq!(account.in_flight_value(), U256::from(10));
        assert_eq!(account.peak_pending(), 2);
    }

    #[test]
    fn test_value_target_completes_account() {
        let mut account = Account::new(0, PrivateKeySigner::random(), 0);
        let target = Some(U256::from(20));
        account.record_send(U256::from(10));
        account.record_settled(true, U256::from(10), target);
        assert!(!account.is_complete());
        account.record_send(U256::from(10));
        account.record_settled(true, U256::from(10), target);
        assert!(account.is_complete());
        assert!(!account.is_eligible(4));
    }

    #[test]
    fn test_release_restores_cursor() {
        let mut account = Account::new(0, PrivateKeySigner::random(), 3);
        account.record_send(U256::from(1));
        account.release_rejected(3, U256::from(1));
        assert_eq!(account.local_nonce(), 3);
        assert_eq!(account.pending(), 0);
        assert_eq!(account.in_flight_value(), U256::ZERO);
        assert_eq!(account.summary().failed, 1);
    }
}
