use std::sync::Arc;

use anyhow::{Context, Result};
use base_loadgen::{
    Account, CallProducer, TransferProducer, WorkProducer, generate_signers, load_wallets,
    run_load,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{OutputFormat, RunArgs};

/// Runs a load test and prints the report.
pub(crate) async fn run(args: RunArgs) -> Result<()> {
    let funder = args.node.funder()?;
    let ledger = Arc::new(args.node.ledger()?);

    let signers = match &args.wallets {
        Some(path) => {
            let signers = load_wallets(path)
                .with_context(|| format!("Failed to load wallets from {}", path.display()))?;
            if signers.is_empty() {
                anyhow::bail!("No wallets found in file. Run 'setup' command first.");
            }
            info!(count = signers.len(), path = %path.display(), "Loaded wallets");
            signers
        }
        None => generate_signers(args.accounts, args.seed),
    };

    let config = args.load_config(signers.len());
    let mut producer: Box<dyn WorkProducer> = match (args.call_target, &args.calldata, args.to) {
        (Some(target), Some(calldata), _) => {
            Box::new(CallProducer::new(target, calldata.clone()).with_value(args.call_value()))
        }
        (_, _, Some(to)) => Box::new(TransferProducer::to(args.transfer_value(), to)),
        _ => Box::new(TransferProducer::random(args.transfer_value(), args.seed)),
    };
    let producer = move |account: &Account| producer.produce(account);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl-C, stopping issuance");
            signal.cancel();
        }
    });

    let report = run_load(ledger, &funder, signers, &config, producer, shutdown)
        .await
        .context("Load run failed")?;

    match args.output_format {
        OutputFormat::Text => print!("{report}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }

    if let Some(path) = &args.output {
        report.save(path).with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Report saved");
    }
    Ok(())
}
