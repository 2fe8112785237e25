//! Engine-to-ledger interface.

use alloy_consensus::{SignableTransaction, TxEip1559};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, TxHash, U256};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use op_alloy_consensus::OpTxEnvelope;
use op_alloy_network::TxSignerSync;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{LedgerError, ResolvedLimits, WorkUnit};

/// Which nonce the ledger reports for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonceView {
    /// Only mined operations.
    Committed,
    /// Includes operations still waiting in the pool.
    Pending,
}

/// Settlement status of an included unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    /// Included and executed successfully.
    Success,
    /// Included but reverted.
    Reverted,
}

/// Acknowledgement of an accepted submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// Handle used to await settlement.
    pub handle: TxHash,
    /// When the node acknowledged the unit.
    pub sent_at: Instant,
}

/// Outcome of a settled unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    /// Execution status.
    pub status: SettlementStatus,
    /// Block the unit was included in, if the ledger reports one.
    pub block_number: Option<u64>,
    /// When settlement was observed.
    pub confirmed_at: Instant,
}

impl Settlement {
    /// Returns `true` if the unit executed successfully.
    pub fn is_success(&self) -> bool {
        self.status == SettlementStatus::Success
    }
}

/// A signed, encoded unit ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedUnit {
    /// Sender address.
    pub from: Address,
    /// Recipient or target contract.
    pub to: Address,
    /// Nonce the unit was signed with.
    pub nonce: u64,
    /// Value carried by the unit.
    pub value: U256,
    /// Transaction hash.
    pub hash: TxHash,
    /// EIP-2718 encoded transaction.
    pub raw: Bytes,
}

impl SignedUnit {
    /// Builds and signs an EIP-1559 transaction for `unit` at `nonce`.
    pub fn sign(
        signer: &PrivateKeySigner,
        unit: &WorkUnit,
        nonce: u64,
        limits: &ResolvedLimits,
        chain_id: u64,
    ) -> Result<Self, LedgerError> {
        let mut tx = TxEip1559 {
            chain_id,
            nonce,
            gas_limit: limits.gas_limit,
            max_fee_per_gas: limits.max_fee_per_gas,
            max_priority_fee_per_gas: limits.max_priority_fee_per_gas,
            to: unit.to.into(),
            value: unit.value,
            access_list: Default::default(),
            input: unit.input.clone(),
        };

        let signature =
            signer.sign_transaction_sync(&mut tx).map_err(|e| LedgerError::Signing(e.to_string()))?;
        let signed = tx.into_signed(signature);
        let hash = *signed.hash();
        let envelope = OpTxEnvelope::Eip1559(signed);

        let mut buf = Vec::new();
        envelope.encode_2718(&mut buf);

        Ok(Self {
            from: signer.address(),
            to: unit.to,
            nonce,
            value: unit.value,
            hash,
            raw: Bytes::from(buf),
        })
    }
}

/// Minimum ledger surface the engine needs.
///
/// Implementations must be cheap to share: the engine holds one behind an `Arc` and
/// calls [`Ledger::await_settlement`] from many background tasks at once.
#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    /// Chain id used when signing.
    async fn chain_id(&self) -> Result<u64, LedgerError>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128, LedgerError>;

    /// Nonce of `address` under the given view.
    async fn nonce(&self, address: Address, view: NonceView) -> Result<u64, LedgerError>;

    /// Balance of `address`.
    async fn balance(&self, address: Address) -> Result<U256, LedgerError>;

    /// Submits a signed unit.
    async fn submit(&self, unit: SignedUnit) -> Result<Submission, LedgerError>;

    /// Waits until the unit behind `handle` is included and its status is known.
    ///
    /// There is no per-call timeout; callers bound the wait.
    async fn await_settlement(&self, handle: TxHash) -> Result<Settlement, LedgerError>;

    /// Sends `amount` from `funder` to `to` using the given funder nonce.
    async fn fund(
        &self,
        funder: &PrivateKeySigner,
        to: Address,
        amount: U256,
        nonce: u64,
        limits: &ResolvedLimits,
        chain_id: u64,
    ) -> Result<Submission, LedgerError> {
        let unit = WorkUnit::transfer(to, amount);
        let signed = SignedUnit::sign(funder, &unit, nonce, limits, chain_id)?;
        self.submit(signed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_unit_carries_nonce_and_sender() {
        let signer = PrivateKeySigner::random();
        let unit = WorkUnit::transfer(Address::repeat_byte(0x11), U256::from(1000));
        let limits = ResolvedLimits {
            gas_limit: 21_000,
            max_fee_per_gas: 2_000_000_000,
            max_priority_fee_per_gas: 1_000_000,
        };

        let first = SignedUnit::sign(&signer, &unit, 7, &limits, 8453).unwrap();
        let second = SignedUnit::sign(&signer, &unit, 8, &limits, 8453).unwrap();

        assert_eq!(first.from, signer.address());
        assert_eq!(first.nonce, 7);
        assert_eq!(first.value, U256::from(1000));
        assert!(first.raw.len() > 100);
        assert_ne!(first.hash, second.hash);
    }
}
