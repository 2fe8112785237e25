//! Nonce recovery after failed units.

use tracing::{debug, warn};

use crate::{Account, Ledger, NonceView};

/// What the recovery policy decided for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Keep the local cursor.
    Keep,
    /// Cursor overwritten with the ledger's pending-view nonce.
    Resynced {
        /// Cursor before the resync.
        from: u64,
        /// Pending-view nonce now in use.
        to: u64,
    },
    /// Threshold reached but the pending view could not be read; retried on the next
    /// failure.
    ResyncFailed,
}

/// Resyncs an account's cursor from the pending view after repeated failures.
///
/// Local optimistic tracking drifts from the ledger after dropped or invalid units.
/// Resyncing only past a threshold avoids querying the ledger before every send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceRecovery {
    threshold: u32,
}

impl NonceRecovery {
    /// Creates a policy that resyncs after `threshold` consecutive failures.
    pub const fn new(threshold: u32) -> Self {
        Self { threshold }
    }

    /// Failure count that triggers a resync.
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Records a failure for `account` and resyncs if the threshold is reached.
    pub async fn on_failure<L: Ledger + ?Sized>(
        &self,
        ledger: &L,
        account: &mut Account,
    ) -> Recovery {
        let errors = account.record_error();
        if errors < self.threshold {
            debug!(account = account.index(), errors, "Keeping local nonce");
            return Recovery::Keep;
        }

        let from = account.local_nonce();
        match ledger.nonce(account.address(), NonceView::Pending).await {
            Ok(to) => {
                account.resync(to);
                warn!(
                    account = account.index(),
                    address = %account.address(),
                    from,
                    to,
                    errors,
                    "Resynced nonce from pending view"
                );
                Recovery::Resynced { from, to }
            }
            Err(e) => {
                warn!(account = account.index(), error = %e, "Failed to read pending nonce");
                Recovery::ResyncFailed
            }
        }
    }
}
