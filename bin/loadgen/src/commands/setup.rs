use alloy_primitives::utils::format_ether;
use anyhow::{Context, Result, bail};
use base_loadgen::{
    Ledger, LoadConfig, PoolManager, generate_signers, required_funding, save_wallets,
};
use tracing::{info, warn};

use crate::cli::SetupArgs;

/// Funds `args.accounts` fresh accounts and writes the funded ones to `args.output`.
pub(crate) async fn setup(args: SetupArgs) -> Result<()> {
    let funder = args.node.funder()?;
    let ledger = args.node.ledger()?;

    let required = required_funding(args.accounts, args.fund_amount);
    let balance =
        ledger.balance(funder.address()).await.context("Failed to get funder balance")?;
    if balance < required {
        bail!(
            "Insufficient funder balance. Need {} ETH, have {} ETH",
            format_ether(required),
            format_ether(balance)
        );
    }

    let config = LoadConfig::default()
        .with_accounts(args.accounts)
        .with_funding_amount(args.fund_amount);
    let chain_id = ledger.chain_id().await.context("Failed to get chain id")?;
    let gas_price = ledger.gas_price().await.context("Failed to get gas price")?;
    let limits = config.limits.resolve(gas_price);

    let signers = generate_signers(args.accounts, args.seed);
    let pool = PoolManager::new(&ledger, &config)
        .create(&funder, signers, &limits, chain_id)
        .await
        .context("Failed to fund accounts")?;

    for slot in &pool.failed {
        warn!(slot = slot.slot, address = %slot.address, error = %slot.error, "Account not funded");
    }

    let funded: Vec<_> = pool.accounts.iter().map(|account| account.signer().clone()).collect();
    save_wallets(&funded, args.fund_amount, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    info!(funded = funded.len(), path = %args.output.display(), "Wallets saved");
    println!(
        "Funded {} of {} accounts with {} ETH each, saved to {}",
        funded.len(),
        args.accounts,
        format_ether(args.fund_amount),
        args.output.display()
    );
    Ok(())
}
