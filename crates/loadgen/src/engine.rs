//! End-to-end run orchestration.

use std::sync::Arc;

use alloy_signer_local::PrivateKeySigner;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    ConfigError, EngineError, Ledger, LoadConfig, NonceRecovery, PoolManager, RunReport,
    Scheduler, Submitter, WorkProducer,
};

/// Funds `signers` from `funder`, drives load until the termination policy is met and
/// returns the aggregated report.
///
/// Fails before any unit is issued if the config is invalid, the signer count does not
/// match `config.accounts`, a startup query fails, or no account could be funded.
pub async fn run_load<L, P>(
    ledger: Arc<L>,
    funder: &PrivateKeySigner,
    signers: Vec<PrivateKeySigner>,
    config: &LoadConfig,
    producer: P,
    shutdown: CancellationToken,
) -> Result<RunReport, EngineError>
where
    L: Ledger + ?Sized,
    P: WorkProducer,
{
    config.validate()?;
    if signers.len() != config.accounts {
        return Err(ConfigError::SignerCount { expected: config.accounts, actual: signers.len() }
            .into());
    }

    let chain_id = ledger.chain_id().await?;
    let gas_price = ledger.gas_price().await?;
    let limits = config.limits.resolve(gas_price);
    info!(
        chain_id,
        gas_price,
        max_fee_per_gas = limits.max_fee_per_gas,
        max_priority_fee_per_gas = limits.max_priority_fee_per_gas,
        "Resolved resource limits"
    );

    let pool = PoolManager::new(ledger.as_ref(), config)
        .create(funder, signers, &limits, chain_id)
        .await?;

    let recovery = NonceRecovery::new(config.nonce_refresh_threshold);
    let submitter = Submitter::new(Arc::clone(&ledger), limits, chain_id, recovery);
    let outcome = Scheduler::new(config, submitter, producer, pool.accounts).run(shutdown).await;

    let report = RunReport::new(
        config.clone(),
        outcome.results,
        outcome.accounts.iter().map(|account| account.summary()).collect(),
        pool.failed,
        pool.reused,
        outcome.stop_reason,
        outcome.issuing,
        outcome.duration,
    );

    info!(
        issued = report.result.total_issued,
        confirmed = report.result.total_confirmed,
        failed = report.result.total_failed,
        confirmed_tps = report.result.confirmed_throughput,
        p50_ms = report.result.p50_latency_ms,
        "Load run finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use alloy_primitives::{Address, U256};

    use super::*;
    use crate::{StopReason, TransferProducer, generate_signers, test_utils::MockLedger};

    fn config(accounts: usize) -> LoadConfig {
        LoadConfig::default()
            .with_accounts(accounts)
            .with_count(12)
            .with_max_pending(2)
            .with_funding_amount(U256::from(1_000))
    }

    #[tokio::test]
    async fn test_run_load_funds_and_issues() {
        let ledger = Arc::new(MockLedger::new());
        let funder = PrivateKeySigner::random();
        let config = config(3);
        let signers = generate_signers(3, Some(42));
        let sink = Address::repeat_byte(0x77);

        let report = run_load(
            Arc::clone(&ledger),
            &funder,
            signers.clone(),
            &config,
            TransferProducer::to(U256::from(2), sink),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.stop_reason, StopReason::CountReached);
        assert_eq!(report.result.total_issued, 12);
        assert_eq!(report.result.total_confirmed, 12);
        assert_eq!(report.result.success_rate, 100.0);
        assert_eq!(report.accounts.len(), 3);
        assert_eq!(report.accounts.iter().map(|a| a.issued).sum::<u64>(), 12);
        assert_eq!(ledger.balance_of(sink), U256::from(24));
        for signer in &signers {
            assert_eq!(ledger.balance_of(signer.address()), U256::from(1_000));
        }
    }

    #[tokio::test]
    async fn test_signer_count_mismatch_fails_before_funding() {
        let ledger = Arc::new(MockLedger::new());
        let funder = PrivateKeySigner::random();

        let err = run_load(
            Arc::clone(&ledger),
            &funder,
            generate_signers(2, None),
            &config(3),
            TransferProducer::to(U256::from(1), Address::ZERO),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            EngineError::Config(ConfigError::SignerCount { expected: 3, actual: 2 })
        ));
        assert!(ledger.submissions().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let ledger = Arc::new(MockLedger::new());
        let config = config(1).with_count(0);

        let err = run_load(
            ledger,
            &PrivateKeySigner::random(),
            generate_signers(1, None),
            &config,
            TransferProducer::to(U256::from(1), Address::ZERO),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::Config(ConfigError::InvalidTermination(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfundable_pool_fails() {
        let ledger = Arc::new(MockLedger::new());
        ledger.drop_settlements(true);
        let config = config(2).with_funding_timeout(Duration::from_secs(1));

        let err = run_load(
            ledger,
            &PrivateKeySigner::random(),
            generate_signers(2, Some(1)),
            &config,
            TransferProducer::to(U256::from(1), Address::ZERO),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EngineError::Pool(crate::PoolError::Empty(2))));
    }
}
