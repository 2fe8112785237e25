//! Error types for the load generation engine.

use alloy_primitives::Address;
use thiserror::Error;

/// Errors returned by a [`Ledger`](crate::Ledger) implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The node rejected a submitted unit (malformed, underpriced, stale nonce).
    #[error("submission rejected: {reason}")]
    Submission {
        /// Reason reported by the node.
        reason: String,
    },
    /// A submitted unit could not be settled (dropped or never observed).
    #[error("settlement failed: {reason}")]
    Settlement {
        /// Reason the handle could not be settled.
        reason: String,
    },
    /// Transport error (HTTP, IPC, etc.).
    #[error("transport error: {0}")]
    Transport(String),
    /// Failed to sign or build a unit locally.
    #[error("signing error: {0}")]
    Signing(String),
}

impl LedgerError {
    /// Builds a [`LedgerError::Submission`] from any displayable reason.
    pub fn submission(reason: impl ToString) -> Self {
        Self::Submission { reason: reason.to_string() }
    }

    /// Builds a [`LedgerError::Settlement`] from any displayable reason.
    pub fn settlement(reason: impl ToString) -> Self {
        Self::Settlement { reason: reason.to_string() }
    }
}

/// Errors raised while validating a [`LoadConfig`](crate::LoadConfig).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// At least one account is required.
    #[error("account count must be greater than zero")]
    NoAccounts,
    /// At least one pending unit per account is required.
    #[error("max pending units per account must be greater than zero")]
    ZeroPending,
    /// The termination target can never be reached.
    #[error("invalid termination target: {0}")]
    InvalidTermination(String),
    /// The nonce refresh threshold must be at least one.
    #[error("nonce refresh threshold must be greater than zero")]
    ZeroRefreshThreshold,
    /// The funding retry policy allows no attempts.
    #[error("funding retry policy must allow at least one attempt")]
    ZeroRetryAttempts,
    /// The gas limit is zero.
    #[error("gas limit must be greater than zero")]
    ZeroGasLimit,
    /// The number of signers handed to a run differs from the configured account count.
    #[error("expected {expected} signers, got {actual}")]
    SignerCount {
        /// Configured account count.
        expected: usize,
        /// Signers supplied.
        actual: usize,
    },
}

/// Errors that abort account pool creation as a whole.
///
/// A single slot failing to fund is not an error; it is reported in
/// [`PoolReport::failed`](crate::PoolReport).
#[derive(Debug, Error)]
pub enum PoolError {
    /// Could not read the funding identity's nonce.
    #[error("failed to read funder nonce for {address}: {source}")]
    FunderNonce {
        /// Funding identity.
        address: Address,
        /// Underlying ledger error.
        #[source]
        source: LedgerError,
    },
    /// Every slot failed to fund.
    #[error("no accounts could be funded ({0} slots failed)")]
    Empty(usize),
}

/// Error returned by [`with_retry`](crate::with_retry) once every attempt failed.
#[derive(Debug, Error)]
#[error("gave up after {attempts} attempts: {last}")]
pub struct RetryError<E: std::error::Error> {
    /// Number of attempts made.
    pub attempts: u32,
    /// Error of the final attempt.
    #[source]
    pub last: E,
}

/// Error raised by a single funding attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FundingError {
    /// Ledger interaction failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The funding transfer was included but reverted.
    #[error("funding transfer {0} reverted")]
    Reverted(String),
    /// The funding transfer was not settled in time.
    #[error("funding transfer not settled within {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors that stop a run before issuance starts.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A startup query against the ledger failed.
    #[error("ledger query failed: {0}")]
    Ledger(#[from] LedgerError),
    /// The account pool could not be created.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Errors writing a run report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// IO error writing the report file.
    #[error("report io error: {0}")]
    Io(#[from] std::io::Error),
    /// The report could not be serialized.
    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}
