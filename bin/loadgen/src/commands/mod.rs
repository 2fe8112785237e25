//! Subcommand implementations.

mod run;
pub(crate) use run::run;

mod setup;
pub(crate) use setup::setup;

use std::time::Duration;

use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result};
use base_loadgen::RpcLedger;

use crate::cli::NodeArgs;

impl NodeArgs {
    /// Parses the funder key.
    pub(crate) fn funder(&self) -> Result<PrivateKeySigner> {
        self.funder_key.parse().context("Failed to parse funder private key")
    }

    /// Connects to the node.
    pub(crate) fn ledger(&self) -> Result<RpcLedger> {
        let ledger = RpcLedger::connect_http(&self.rpc_url)
            .with_context(|| format!("Failed to connect to {}", self.rpc_url))?;
        Ok(ledger.with_poll_interval(Duration::from_millis(self.poll_interval_ms)))
    }
}
