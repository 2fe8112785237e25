#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod error;
pub use error::{
    ConfigError, EngineError, FundingError, LedgerError, PoolError, ReportError, RetryError,
};

mod config;
pub use config::{
    ConfirmMode, DEFAULT_FUNDING_AMOUNT, DEFAULT_PRIORITY_FEE, DEFAULT_TRANSFER_GAS_LIMIT,
    LoadConfig, ResolvedLimits, ResourceLimits, RetryPolicy, Termination,
};

mod ledger;
pub use ledger::{Ledger, NonceView, Settlement, SettlementStatus, SignedUnit, Submission};

mod rpc;
pub use rpc::{DEFAULT_MAX_MISSING_POLLS, DEFAULT_POLL_INTERVAL, RpcLedger};

mod producer;
pub use producer::{CallProducer, TransferProducer, WorkProducer, WorkUnit};

mod account;
pub use account::{Account, AccountSummary};

mod retry;
pub use retry::with_retry;

mod pool;
pub use pool::{FailedSlot, PoolManager, PoolReport, required_funding};

mod nonce;
pub use nonce::{NonceRecovery, Recovery};

mod submitter;
pub use submitter::{SendOutcome, Submitter};

mod tracker;
pub use tracker::{Ticket, Tracker, TrackerEvent, TrackerEventKind};

mod scheduler;
pub use scheduler::{Phase, RunOutcome, Scheduler, StopReason};

mod metrics;
pub use metrics::{BenchmarkResult, ErrorBreakdown, WorkResult, WorkStatus, aggregate, percentile};

mod report;
pub use report::{RunReport, save_report};

mod engine;
pub use engine::run_load;

mod wallet;
pub use wallet::{
    WalletData, WalletError, WalletsFile, generate_signers, load_wallets, save_wallets,
};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
