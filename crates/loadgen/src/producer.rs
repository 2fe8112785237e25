//! Work unit producers.

use alloy_primitives::{Address, Bytes, U256};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::Account;

/// An unsigned operation to be issued by one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Recipient or target contract.
    pub to: Address,
    /// Value transferred with the unit.
    pub value: U256,
    /// Calldata.
    pub input: Bytes,
}

impl WorkUnit {
    /// A plain value transfer.
    pub const fn transfer(to: Address, value: U256) -> Self {
        Self { to, value, input: Bytes::new() }
    }

    /// A contract call.
    pub const fn call(to: Address, input: Bytes, value: U256) -> Self {
        Self { to, value, input }
    }
}

/// Produces the next unit for an account.
///
/// Each benchmark variant supplies its own producer; the engine only sees [`WorkUnit`]s.
pub trait WorkProducer: Send {
    /// Returns the next unit `account` should issue.
    fn produce(&mut self, account: &Account) -> WorkUnit;
}

impl<F> WorkProducer for F
where
    F: FnMut(&Account) -> WorkUnit + Send,
{
    fn produce(&mut self, account: &Account) -> WorkUnit {
        self(account)
    }
}

/// Recipient selection for [`TransferProducer`].
#[derive(Debug, Clone)]
enum Recipient {
    Fixed(Address),
    Random(ChaCha8Rng),
}

/// Native value transfers of a fixed amount.
#[derive(Debug, Clone)]
pub struct TransferProducer {
    value: U256,
    recipient: Recipient,
}

impl TransferProducer {
    /// Transfers `value` to random addresses drawn from `seed`, or from OS entropy.
    pub fn random(value: U256, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self { value, recipient: Recipient::Random(rng) }
    }

    /// Transfers `value` to a fixed address.
    pub const fn to(value: U256, to: Address) -> Self {
        Self { value, recipient: Recipient::Fixed(to) }
    }
}

impl WorkProducer for TransferProducer {
    fn produce(&mut self, _account: &Account) -> WorkUnit {
        let to = match &mut self.recipient {
            Recipient::Fixed(to) => *to,
            Recipient::Random(rng) => {
                let mut bytes = [0u8; 20];
                rng.fill(&mut bytes);
                Address::from(bytes)
            }
        };
        WorkUnit::transfer(to, self.value)
    }
}

/// Calls to a fixed contract with fixed calldata.
#[derive(Debug, Clone)]
pub struct CallProducer {
    target: Address,
    input: Bytes,
    value: U256,
}

impl CallProducer {
    /// Calls `target` with `input` and no value.
    pub const fn new(target: Address, input: Bytes) -> Self {
        Self { target, input, value: U256::ZERO }
    }

    /// Attaches `value` to every call.
    pub const fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

impl WorkProducer for CallProducer {
    fn produce(&mut self, _account: &Account) -> WorkUnit {
        WorkUnit::call(self.target, self.input.clone(), self.value)
    }
}
