//! In-memory ledger for exercising the engine without a node.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use alloy_primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use tokio::time::{Instant, sleep};

use crate::{
    Ledger, LedgerError, NonceView, Settlement, SettlementStatus, SignedUnit, Submission,
};

/// Chain id reported by [`MockLedger`].
pub const MOCK_CHAIN_ID: u64 = 8453;

/// Gas price reported by [`MockLedger`].
pub const MOCK_GAS_PRICE: u128 = 1_000_000_000;

#[derive(Debug, Default)]
struct State {
    committed: HashMap<Address, u64>,
    pending: HashMap<Address, u64>,
    balances: HashMap<Address, U256>,
    units: HashMap<TxHash, SignedUnit>,
    submissions: Vec<SignedUnit>,
    in_flight: HashMap<Address, usize>,
    peak_in_flight: HashMap<Address, usize>,
    submit_failures: HashMap<Address, u32>,
    reverting: HashSet<Address>,
    settle_delay: Duration,
    hang: bool,
    drop_settlements: bool,
    fail_nonce_queries: bool,
    nonce_queries: Vec<(Address, NonceView)>,
}

/// Scriptable [`Ledger`] backed by a mutex-guarded map.
///
/// Accepted units bump the sender's pending nonce; settled units bump the committed
/// nonce and credit the recipient.
#[derive(Debug, Clone, Default)]
pub struct MockLedger {
    state: Arc<Mutex<State>>,
}

impl MockLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Sets both nonce views of `address`.
    pub fn set_nonce(&self, address: Address, nonce: u64) {
        let mut state = self.state();
        state.committed.insert(address, nonce);
        state.pending.insert(address, nonce);
    }

    /// Sets the pending-view nonce of `address`.
    pub fn set_pending_nonce(&self, address: Address, nonce: u64) {
        self.state().pending.insert(address, nonce);
    }

    /// Sets the balance of `address`.
    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state().balances.insert(address, balance);
    }

    /// Rejects the next `n` submissions from `address`.
    pub fn fail_next_submits(&self, address: Address, n: u32) {
        self.state().submit_failures.insert(address, n);
    }

    /// Settles every unit from `address` as reverted.
    pub fn revert_from(&self, address: Address) {
        self.state().reverting.insert(address);
    }

    /// Delays every settlement by `delay`.
    pub fn set_settle_delay(&self, delay: Duration) {
        self.state().settle_delay = delay;
    }

    /// Makes settlements never resolve.
    pub fn hang_settlements(&self, hang: bool) {
        self.state().hang = hang;
    }

    /// Makes settlements fail as dropped.
    pub fn drop_settlements(&self, drop: bool) {
        self.state().drop_settlements = drop;
    }

    /// Makes nonce queries fail.
    pub fn fail_nonce_queries(&self, fail: bool) {
        self.state().fail_nonce_queries = fail;
    }

    /// Every accepted submission, in acceptance order.
    pub fn submissions(&self) -> Vec<SignedUnit> {
        self.state().submissions.clone()
    }

    /// Nonces of accepted submissions from `address`, in acceptance order.
    pub fn nonces_from(&self, address: Address) -> Vec<u64> {
        self.state().submissions.iter().filter(|u| u.from == address).map(|u| u.nonce).collect()
    }

    /// Highest number of unsettled units observed for `address`.
    pub fn peak_in_flight(&self, address: Address) -> usize {
        self.state().peak_in_flight.get(&address).copied().unwrap_or_default()
    }

    /// Every nonce query, in call order.
    pub fn nonce_queries(&self) -> Vec<(Address, NonceView)> {
        self.state().nonce_queries.clone()
    }

    /// Current balance of `address`.
    pub fn balance_of(&self, address: Address) -> U256 {
        self.state().balances.get(&address).copied().unwrap_or_default()
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn chain_id(&self) -> Result<u64, LedgerError> {
        Ok(MOCK_CHAIN_ID)
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        Ok(MOCK_GAS_PRICE)
    }

    async fn nonce(&self, address: Address, view: NonceView) -> Result<u64, LedgerError> {
        let mut state = self.state();
        state.nonce_queries.push((address, view));
        if state.fail_nonce_queries {
            return Err(LedgerError::Transport("connection refused".into()));
        }
        let nonces = match view {
            NonceView::Committed => &state.committed,
            NonceView::Pending => &state.pending,
        };
        Ok(nonces.get(&address).copied().unwrap_or_default())
    }

    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        Ok(self.balance_of(address))
    }

    async fn submit(&self, unit: SignedUnit) -> Result<Submission, LedgerError> {
        let mut state = self.state();
        if let Some(remaining) = state.submit_failures.get_mut(&unit.from) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LedgerError::submission("nonce too low"));
            }
        }

        let pending = state.pending.entry(unit.from).or_default();
        *pending = (*pending).max(unit.nonce + 1);

        let in_flight = state.in_flight.entry(unit.from).or_default();
        *in_flight += 1;
        let current = *in_flight;
        let peak = state.peak_in_flight.entry(unit.from).or_default();
        *peak = (*peak).max(current);

        let handle = unit.hash;
        state.units.insert(handle, unit.clone());
        state.submissions.push(unit);
        Ok(Submission { handle, sent_at: Instant::now() })
    }

    async fn await_settlement(&self, handle: TxHash) -> Result<Settlement, LedgerError> {
        let (delay, hang) = {
            let state = self.state();
            (state.settle_delay, state.hang)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let mut state = self.state();
        let unit = state
            .units
            .get(&handle)
            .cloned()
            .ok_or_else(|| LedgerError::settlement(format!("unknown handle {handle}")))?;

        if let Some(in_flight) = state.in_flight.get_mut(&unit.from) {
            *in_flight = in_flight.saturating_sub(1);
        }
        if state.drop_settlements {
            return Err(LedgerError::settlement("dropped from pool"));
        }

        let committed = state.committed.entry(unit.from).or_default();
        *committed = (*committed).max(unit.nonce + 1);

        let status = if state.reverting.contains(&unit.from) {
            SettlementStatus::Reverted
        } else {
            let balance = state.balances.entry(unit.to).or_default();
            *balance = balance.saturating_add(unit.value);
            SettlementStatus::Success
        };

        Ok(Settlement { status, block_number: Some(1), confirmed_at: Instant::now() })
    }
}
