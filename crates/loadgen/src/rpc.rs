//! [`Ledger`] over a JSON-RPC node.

use std::time::Duration;

use alloy_network::ReceiptResponse;
use alloy_primitives::{Address, TxHash, U256};
use alloy_provider::{Provider, ProviderBuilder, RootProvider};
use alloy_transport::TransportError;
use async_trait::async_trait;
use op_alloy_network::Optimism;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace, warn};

use crate::{Ledger, LedgerError, NonceView, Settlement, SettlementStatus, SignedUnit, Submission};

/// Default interval between receipt polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default number of consecutive polls a transaction may be unknown to the node before
/// it is considered dropped.
pub const DEFAULT_MAX_MISSING_POLLS: u32 = 20;

/// Ledger backed by an Optimism JSON-RPC endpoint.
///
/// Settlement has no per-unit timeout. A unit resolves when its receipt appears, or
/// fails once the node has not known the transaction for `max_missing_polls`
/// consecutive polls.
#[derive(Debug, Clone)]
pub struct RpcLedger {
    provider: RootProvider<Optimism>,
    poll_interval: Duration,
    max_missing_polls: u32,
}

impl RpcLedger {
    /// Wraps an existing provider.
    pub const fn new(provider: RootProvider<Optimism>) -> Self {
        Self {
            provider,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_missing_polls: DEFAULT_MAX_MISSING_POLLS,
        }
    }

    /// Connects to `url` over HTTP.
    pub fn connect_http(url: &str) -> Result<Self, LedgerError> {
        let url: url::Url =
            url.parse().map_err(|e| LedgerError::Transport(format!("invalid url {url}: {e}")))?;
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .network::<Optimism>()
            .connect_http(url);
        Ok(Self::new(provider))
    }

    /// Sets the receipt polling interval.
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets how many consecutive misses mark a transaction as dropped.
    pub const fn with_max_missing_polls(mut self, polls: u32) -> Self {
        self.max_missing_polls = polls;
        self
    }

    /// Underlying provider.
    pub const fn provider(&self) -> &RootProvider<Optimism> {
        &self.provider
    }

    /// Returns `true` if the node still knows `handle`, either in a block or in its pool.
    async fn is_known(&self, handle: TxHash) -> Result<bool, TransportError> {
        Ok(self.provider.get_transaction_by_hash(handle).await?.is_some())
    }
}

/// Maps a node error to a ledger error. JSON-RPC error responses are rejections; anything
/// else is a transport failure.
fn classify(error: TransportError) -> LedgerError {
    match error.as_error_resp() {
        Some(payload) => LedgerError::submission(payload.message.to_string()),
        None => LedgerError::Transport(error.to_string()),
    }
}

fn transport(error: TransportError) -> LedgerError {
    LedgerError::Transport(error.to_string())
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn chain_id(&self) -> Result<u64, LedgerError> {
        self.provider.get_chain_id().await.map_err(transport)
    }

    async fn gas_price(&self) -> Result<u128, LedgerError> {
        self.provider.get_gas_price().await.map_err(transport)
    }

    async fn nonce(&self, address: Address, view: NonceView) -> Result<u64, LedgerError> {
        let request = self.provider.get_transaction_count(address);
        let request = match view {
            NonceView::Committed => request.latest(),
            NonceView::Pending => request.pending(),
        };
        request.await.map_err(transport)
    }

    async fn balance(&self, address: Address) -> Result<U256, LedgerError> {
        self.provider.get_balance(address).await.map_err(transport)
    }

    async fn submit(&self, unit: SignedUnit) -> Result<Submission, LedgerError> {
        let pending = self.provider.send_raw_transaction(&unit.raw).await.map_err(classify)?;
        let handle = *pending.tx_hash();
        if handle != unit.hash {
            warn!(expected = %unit.hash, returned = %handle, "Node returned unexpected hash");
        }
        Ok(Submission { handle, sent_at: Instant::now() })
    }

    async fn await_settlement(&self, handle: TxHash) -> Result<Settlement, LedgerError> {
        let mut missing = 0u32;

        loop {
            match self.provider.get_transaction_receipt(handle).await {
                Ok(Some(receipt)) => {
                    let status = if receipt.status() {
                        SettlementStatus::Success
                    } else {
                        SettlementStatus::Reverted
                    };
                    trace!(%handle, ?status, block = ?receipt.block_number(), "Receipt found");
                    return Ok(Settlement {
                        status,
                        block_number: receipt.block_number(),
                        confirmed_at: Instant::now(),
                    });
                }
                Ok(None) => match self.is_known(handle).await {
                    Ok(true) => missing = 0,
                    Ok(false) => {
                        missing += 1;
                        debug!(%handle, missing, "Transaction unknown to node");
                        if missing >= self.max_missing_polls {
                            return Err(LedgerError::settlement(format!(
                                "dropped: {handle} unknown for {missing} polls"
                            )));
                        }
                    }
                    Err(e) => debug!(%handle, error = %e, "Transaction lookup failed"),
                },
                Err(e) => debug!(%handle, error = %e, "Receipt poll failed"),
            }

            sleep(self.poll_interval).await;
        }
    }
}
