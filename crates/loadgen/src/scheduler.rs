//! The issuance control loop.

use std::{collections::HashMap, sync::Arc, time::Duration};

use alloy_primitives::{TxHash, U256};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    Account, ConfirmMode, Ledger, LedgerError, LoadConfig, SendOutcome, Submitter, Termination,
    Ticket, Tracker, TrackerEvent, TrackerEventKind, WorkProducer, WorkResult, WorkStatus,
};

/// Scheduler phase. Runs move strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// New units are being issued.
    Issuing,
    /// Issuance stopped; waiting for outstanding settlements.
    Draining,
    /// Run finished.
    Done,
}

/// Why issuance stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The unit count target was issued.
    CountReached,
    /// The run deadline passed.
    DeadlineReached,
    /// Every account reached its value target.
    AllComplete,
    /// Shutdown was requested.
    Cancelled,
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// Final account states.
    pub accounts: Vec<Account>,
    /// Result log in completion order.
    pub results: Vec<WorkResult>,
    /// Units issued, including rejected sends.
    pub issued: u64,
    /// Time spent issuing.
    pub issuing: Duration,
    /// Total run time, drain included.
    pub duration: Duration,
    /// Why issuance stopped.
    pub stop_reason: StopReason,
    /// Units still unsettled when the drain window closed.
    pub timed_out: usize,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    account: usize,
    nonce: u64,
    value: U256,
    sent_at: Instant,
    handle: Option<TxHash>,
}

/// Drives issuance across all accounts until the termination policy is met, then
/// drains outstanding settlements.
///
/// The scheduler is the only owner of account state and of the result log. Tracker
/// tasks report settlements over a channel and the scheduler applies them between
/// issuance steps, so send-side and settle-side updates never interleave.
#[derive(Debug)]
pub struct Scheduler<'a, L: ?Sized, P> {
    config: &'a LoadConfig,
    submitter: Submitter<L>,
    producer: P,
    accounts: Vec<Account>,
    tracker: Tracker<L>,
    events: mpsc::UnboundedReceiver<TrackerEvent>,
    in_flight: HashMap<Ticket, InFlight>,
    next_ticket: Ticket,
    results: Vec<WorkResult>,
    issued: u64,
    phase: Phase,
    start: Instant,
    deadline: Option<Instant>,
}

impl<'a, L, P> Scheduler<'a, L, P>
where
    L: Ledger + ?Sized,
    P: WorkProducer,
{
    /// Creates a scheduler over `accounts`.
    pub fn new(
        config: &'a LoadConfig,
        submitter: Submitter<L>,
        producer: P,
        accounts: Vec<Account>,
    ) -> Self {
        let (tracker, events) = Tracker::new(Arc::clone(submitter.ledger()));
        let start = Instant::now();
        Self {
            config,
            submitter,
            producer,
            accounts,
            tracker,
            events,
            in_flight: HashMap::new(),
            next_ticket: 0,
            results: Vec::new(),
            issued: 0,
            phase: Phase::Issuing,
            start,
            deadline: None,
        }
    }

    /// Current phase.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Runs until issuance stops and the drain completes or times out.
    pub async fn run(mut self, shutdown: CancellationToken) -> RunOutcome {
        self.start = Instant::now();
        self.deadline = match self.config.termination {
            Termination::Count(_) => None,
            Termination::Duration(d) => Some(self.start + d),
            Termination::ValueTarget { timeout, .. } => Some(self.start + timeout),
        };

        info!(
            accounts = self.accounts.len(),
            max_pending = self.config.pending_cap(),
            termination = ?self.config.termination,
            mode = ?self.config.confirm_mode,
            "Starting issuance"
        );

        let stop_reason = self.issue(&shutdown).await;
        let issuing = self.start.elapsed();

        self.phase = Phase::Draining;
        info!(
            reason = ?stop_reason,
            issued = self.issued,
            in_flight = self.in_flight.len(),
            issuing_secs = issuing.as_secs_f64(),
            "Issuance stopped, draining"
        );

        let timed_out = self.drain().await;
        self.phase = Phase::Done;
        let duration = self.start.elapsed();

        info!(
            issued = self.issued,
            settled = self.results.len(),
            timed_out,
            duration_secs = duration.as_secs_f64(),
            "Run complete"
        );

        RunOutcome {
            accounts: self.accounts,
            results: self.results,
            issued: self.issued,
            issuing,
            duration,
            stop_reason,
            timed_out,
        }
    }

    async fn issue(&mut self, shutdown: &CancellationToken) -> StopReason {
        loop {
            self.apply_ready().await;
            if shutdown.is_cancelled() {
                return StopReason::Cancelled;
            }
            if let Some(reason) = self.stop_reason() {
                return reason;
            }

            let mut issued = 0;
            for index in 0..self.accounts.len() {
                if !self.is_eligible(index) {
                    continue;
                }
                self.issue_one(index).await;
                issued += 1;
                if let Some(reason) = self.stop_reason() {
                    return reason;
                }
            }

            if issued == 0 {
                self.wait_for_capacity(shutdown).await;
            }
        }
    }

    fn stop_reason(&self) -> Option<StopReason> {
        if let Termination::Count(target) = self.config.termination {
            if self.issued >= target {
                return Some(StopReason::CountReached);
            }
        }
        if matches!(self.config.termination, Termination::ValueTarget { .. })
            && self.accounts.iter().all(Account::is_complete)
        {
            return Some(StopReason::AllComplete);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Some(StopReason::DeadlineReached);
        }
        None
    }

    fn value_target(&self) -> Option<U256> {
        match self.config.termination {
            Termination::ValueTarget { per_account, .. } => Some(per_account),
            _ => None,
        }
    }

    fn is_eligible(&self, index: usize) -> bool {
        let account = &self.accounts[index];
        if !account.is_eligible(self.config.pending_cap()) {
            return false;
        }
        // Value already sent plus value in flight must stay under the target.
        self.value_target().is_none_or(|target| {
            account.cumulative_value_sent().saturating_add(account.in_flight_value()) < target
        })
    }

    async fn issue_one(&mut self, index: usize) {
        let unit = self.producer.produce(&self.accounts[index]);
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.issued += 1;

        match self.config.confirm_mode {
            ConfirmMode::Async => {
                let account = &mut self.accounts[index];
                match self.submitter.send(account, &unit).await {
                    SendOutcome::Accepted { nonce, submission } => {
                        self.in_flight.insert(
                            ticket,
                            InFlight {
                                account: index,
                                nonce,
                                value: unit.value,
                                sent_at: submission.sent_at,
                                handle: Some(submission.handle),
                            },
                        );
                        self.tracker.track(ticket, submission.handle);
                    }
                    SendOutcome::Rejected { nonce, error, .. } => {
                        let now = Instant::now();
                        self.push_result(
                            index,
                            nonce,
                            None,
                            now,
                            Some(now),
                            None,
                            WorkStatus::SubmitFailed,
                            Some(error),
                        );
                    }
                }
            }
            ConfirmMode::Gated => {
                let account = &mut self.accounts[index];
                let nonce = account.local_nonce();
                match self.submitter.reserve(account, &unit) {
                    Ok(signed) => {
                        debug!(account = index, nonce, handle = %signed.hash, "Unit dispatched");
                        self.in_flight.insert(
                            ticket,
                            InFlight {
                                account: index,
                                nonce,
                                value: unit.value,
                                sent_at: Instant::now(),
                                handle: Some(signed.hash),
                            },
                        );
                        self.tracker.submit_and_track(ticket, signed);
                    }
                    Err(error) => {
                        account.record_rejected();
                        self.submitter
                            .recovery()
                            .on_failure(self.submitter.ledger().as_ref(), account)
                            .await;
                        let now = Instant::now();
                        self.push_result(
                            index,
                            nonce,
                            None,
                            now,
                            Some(now),
                            None,
                            WorkStatus::SubmitFailed,
                            Some(error),
                        );
                    }
                }
            }
        }
    }

    async fn wait_for_capacity(&mut self, shutdown: &CancellationToken) {
        let mut wake = Instant::now() + self.config.idle_backoff;
        if let Some(deadline) = self.deadline {
            wake = wake.min(deadline);
        }

        let event = tokio::select! {
            biased;
            event = self.events.recv() => event,
            _ = shutdown.cancelled() => None,
            _ = sleep_until(wake) => None,
        };
        if let Some(event) = event {
            self.apply(event).await;
        }
    }

    async fn apply_ready(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.apply(event).await;
        }
        self.tracker.reap();
    }

    async fn apply(&mut self, event: TrackerEvent) {
        let TrackerEvent { ticket, kind } = event;

        if let TrackerEventKind::Submitted(submission) = &kind {
            if let Some(entry) = self.in_flight.get_mut(&ticket) {
                entry.sent_at = submission.sent_at;
                entry.handle = Some(submission.handle);
            }
            return;
        }

        let Some(entry) = self.in_flight.remove(&ticket) else {
            warn!(ticket, "Event for unknown unit");
            return;
        };
        let target = self.value_target();
        let account = &mut self.accounts[entry.account];
        let now = Instant::now();

        let failure = match kind {
            TrackerEventKind::Submitted(_) => return,
            TrackerEventKind::Rejected(error) => {
                account.release_rejected(entry.nonce, entry.value);
                warn!(
                    account = entry.account,
                    nonce = entry.nonce,
                    error = %error,
                    "Gated unit rejected"
                );
                Some((None, now, WorkStatus::SubmitFailed, error))
            }
            TrackerEventKind::Settled(settlement) => {
                let success = settlement.is_success();
                account.record_settled(success, entry.value, target);
                if success {
                    debug!(account = entry.account, nonce = entry.nonce, "Unit confirmed");
                    self.push_result(
                        entry.account,
                        entry.nonce,
                        entry.handle,
                        entry.sent_at,
                        Some(settlement.confirmed_at),
                        Some(settlement.confirmed_at),
                        WorkStatus::Confirmed,
                        None,
                    );
                    None
                } else {
                    warn!(
                        account = entry.account,
                        nonce = entry.nonce,
                        handle = ?entry.handle,
                        "Unit reverted"
                    );
                    Some((
                        Some(settlement.confirmed_at),
                        settlement.confirmed_at,
                        WorkStatus::Reverted,
                        LedgerError::settlement("reverted"),
                    ))
                }
            }
            TrackerEventKind::Failed(error) => {
                account.record_settled(false, entry.value, target);
                warn!(
                    account = entry.account,
                    nonce = entry.nonce,
                    error = %error,
                    "Unit settlement failed"
                );
                Some((None, now, WorkStatus::SettlementFailed, error))
            }
        };

        if let Some((included_at, settled_at, status, error)) = failure {
            let account = &mut self.accounts[entry.account];
            self.submitter.recovery().on_failure(self.submitter.ledger().as_ref(), account).await;
            self.push_result(
                entry.account,
                entry.nonce,
                entry.handle,
                entry.sent_at,
                Some(settled_at),
                included_at,
                status,
                Some(error),
            );
        }
    }

    async fn drain(&mut self) -> usize {
        let drain_deadline = Instant::now() + self.config.drain_timeout;
        self.apply_ready().await;

        while !self.in_flight.is_empty() {
            let event = tokio::select! {
                biased;
                event = self.events.recv() => event,
                _ = sleep_until(drain_deadline) => None,
            };
            match event {
                Some(event) => self.apply(event).await,
                None => break,
            }
        }

        self.tracker.abort_all();

        let expired: Vec<_> = self.in_flight.drain().map(|(_, entry)| entry).collect();
        let timed_out = expired.len();
        if timed_out > 0 {
            warn!(
                timed_out,
                drain_timeout = ?self.config.drain_timeout,
                "Drain window closed with unsettled units"
            );
        }
        for entry in expired {
            self.push_result(
                entry.account,
                entry.nonce,
                entry.handle,
                entry.sent_at,
                None,
                None,
                WorkStatus::TimedOut,
                Some(LedgerError::settlement("not settled within drain window")),
            );
        }
        timed_out
    }

    #[allow(clippy::too_many_arguments)]
    fn push_result(
        &mut self,
        account: usize,
        nonce: u64,
        handle: Option<TxHash>,
        sent_at: Instant,
        settled_at: Option<Instant>,
        included_at: Option<Instant>,
        status: WorkStatus,
        error: Option<LedgerError>,
    ) {
        let offset = |at: Instant| at.saturating_duration_since(self.start).as_secs_f64() * 1000.0;
        let send_time_ms = offset(sent_at);
        let latency_ms =
            included_at.map(|at| at.saturating_duration_since(sent_at).as_secs_f64() * 1000.0);

        self.results.push(WorkResult {
            handle,
            account_index: account,
            nonce_used: nonce,
            send_time_ms,
            confirm_time_ms: settled_at.map(offset),
            latency_ms,
            success: status == WorkStatus::Confirmed,
            status,
            error: error.map(|e| e.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;
    use alloy_signer_local::PrivateKeySigner;

    use super::*;
    use crate::{
        NonceRecovery, ResolvedLimits, TransferProducer,
        test_utils::{MOCK_CHAIN_ID, MockLedger},
    };

    const SINK: Address = Address::repeat_byte(0x5e);

    fn accounts(n: usize) -> Vec<Account> {
        (0..n).map(|i| Account::new(i, PrivateKeySigner::random(), 0)).collect()
    }

    async fn run(
        ledger: &Arc<MockLedger>,
        config: &LoadConfig,
        accounts: Vec<Account>,
    ) -> RunOutcome {
        let limits = ResolvedLimits {
            gas_limit: 21_000,
            max_fee_per_gas: 2_000_000_000,
            max_priority_fee_per_gas: 1,
        };
        let recovery = NonceRecovery::new(config.nonce_refresh_threshold);
        let submitter = Submitter::new(Arc::clone(ledger), limits, MOCK_CHAIN_ID, recovery);
        let producer = TransferProducer::to(U256::from(1), SINK);
        Scheduler::new(config, submitter, producer, accounts).run(CancellationToken::new()).await
    }

    #[tokio::test]
    async fn test_count_mode_respects_pending_cap() {
        let ledger = Arc::new(MockLedger::new());
        let config = LoadConfig::default().with_count(9).with_max_pending(1);
        let accounts = accounts(3);
        let addresses: Vec<_> = accounts.iter().map(Account::address).collect();

        let outcome = run(&ledger, &config, accounts).await;

        assert_eq!(outcome.stop_reason, StopReason::CountReached);
        assert_eq!(outcome.issued, 9);
        assert_eq!(outcome.results.len(), 9);
        assert!(outcome.results.iter().all(|r| r.status == WorkStatus::Confirmed));
        // Every round issues once per account.
        for round in ledger.submissions().chunks(3) {
            let mut senders: Vec<_> = round.iter().map(|unit| unit.from).collect();
            senders.sort();
            let mut expected = addresses.clone();
            expected.sort();
            assert_eq!(senders, expected);
        }
        for address in addresses {
            assert_eq!(ledger.nonces_from(address), vec![0, 1, 2]);
            assert!(ledger.peak_in_flight(address) <= 1);
        }
        assert!(outcome.accounts.iter().all(|a| a.pending() == 0));
    }

    #[tokio::test]
    async fn test_value_target_completes_every_account() {
        let ledger = Arc::new(MockLedger::new());
        let config = LoadConfig::default()
            .with_value_target(U256::from(4), Duration::from_secs(60))
            .with_max_pending(8);

        let outcome = run(&ledger, &config, accounts(2)).await;

        assert_eq!(outcome.stop_reason, StopReason::AllComplete);
        for account in &outcome.accounts {
            assert!(account.is_complete());
            assert_eq!(account.cumulative_value_sent(), U256::from(4));
            // In-flight value counts toward the target, so nothing overshoots.
            assert_eq!(ledger.nonces_from(account.address()), vec![0, 1, 2, 3]);
        }
        assert_eq!(ledger.balance_of(SINK), U256::from(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_mode_stops_at_deadline() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_settle_delay(Duration::from_millis(100));
        let config = LoadConfig::default()
            .with_duration(Duration::from_secs(1))
            .with_max_pending(2)
            .with_idle_backoff(Duration::from_millis(10));
        let accounts = accounts(1);
        let address = accounts[0].address();

        let outcome = run(&ledger, &config, accounts).await;

        assert_eq!(outcome.stop_reason, StopReason::DeadlineReached);
        assert_eq!(ledger.peak_in_flight(address), 2);
        assert_eq!(outcome.accounts[0].peak_pending(), 2);
        assert!(outcome.issued >= 10);
        assert_eq!(outcome.results.len() as u64, outcome.issued);
        assert!(outcome.results.iter().all(|r| r.send_time_ms < 1000.0));
        assert!(outcome.results.iter().all(|r| r.latency_ms.is_some_and(|l| l >= 100.0)));
        assert_eq!(outcome.timed_out, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_cap_holds_above_one() {
        let ledger = Arc::new(MockLedger::new());
        ledger.set_settle_delay(Duration::from_millis(50));
        let config = LoadConfig::default()
            .with_count(60)
            .with_max_pending(3)
            .with_idle_backoff(Duration::from_millis(5));
        let accounts = accounts(4);
        let addresses: Vec<_> = accounts.iter().map(Account::address).collect();

        let outcome = run(&ledger, &config, accounts).await;

        assert_eq!(outcome.stop_reason, StopReason::CountReached);
        assert_eq!(outcome.issued, 60);
        for address in addresses {
            assert_eq!(ledger.nonces_from(address), (0..15).collect::<Vec<u64>>());
            assert_eq!(ledger.peak_in_flight(address), 3);
        }
        assert!(outcome.accounts.iter().all(|a| a.peak_pending() == 3));
    }

    #[tokio::test]
    async fn test_gated_mode_keeps_one_unit_in_flight() {
        let ledger = Arc::new(MockLedger::new());
        let config = LoadConfig::default()
            .with_count(5)
            .with_max_pending(4)
            .with_confirm_mode(ConfirmMode::Gated);
        let accounts = accounts(1);
        let address = accounts[0].address();

        let outcome = run(&ledger, &config, accounts).await;

        assert_eq!(ledger.nonces_from(address), vec![0, 1, 2, 3, 4]);
        assert_eq!(ledger.peak_in_flight(address), 1);
        assert_eq!(outcome.accounts[0].peak_pending(), 1);
        assert!(outcome.results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_gated_rejection_releases_nonce() {
        let ledger = Arc::new(MockLedger::new());
        let config = LoadConfig::default().with_count(3).with_confirm_mode(ConfirmMode::Gated);
        let accounts = accounts(1);
        let address = accounts[0].address();
        ledger.fail_next_submits(address, 1);

        let outcome = run(&ledger, &config, accounts).await;

        assert_eq!(ledger.nonces_from(address), vec![0, 1]);
        assert_eq!(outcome.results[0].status, WorkStatus::SubmitFailed);
        assert_eq!(outcome.results[0].nonce_used, 0);
        assert_eq!(outcome.accounts[0].local_nonce(), 2);
        assert_eq!(outcome.accounts[0].consecutive_errors(), 0);
    }

    #[tokio::test]
    async fn test_repeated_rejections_resync_cursor() {
        let ledger = Arc::new(MockLedger::new());
        let config = LoadConfig::default().with_count(5).with_nonce_refresh_threshold(3);
        let accounts = accounts(1);
        let address = accounts[0].address();
        ledger.fail_next_submits(address, 3);
        ledger.set_pending_nonce(address, 7);

        let outcome = run(&ledger, &config, accounts).await;

        assert_eq!(outcome.issued, 5);
        assert_eq!(ledger.nonces_from(address), vec![7, 8]);
        let summary = outcome.accounts[0].summary();
        assert_eq!(summary.resyncs, 1);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.confirmed, 2);
        assert_eq!(
            outcome.results.iter().filter(|r| r.status == WorkStatus::SubmitFailed).count(),
            3
        );
    }

    #[tokio::test]
    async fn test_reverted_units_count_as_errors() {
        let ledger = Arc::new(MockLedger::new());
        let config = LoadConfig::default().with_count(2).with_nonce_refresh_threshold(10);
        let accounts = accounts(1);
        ledger.revert_from(accounts[0].address());

        let outcome = run(&ledger, &config, accounts).await;

        assert_eq!(outcome.results.len(), 2);
        for result in &outcome.results {
            assert_eq!(result.status, WorkStatus::Reverted);
            assert!(!result.success);
            assert!(result.latency_ms.is_some());
        }
        assert_eq!(outcome.accounts[0].consecutive_errors(), 2);
        assert_eq!(ledger.balance_of(SINK), U256::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_timeout_marks_unsettled_units() {
        let ledger = Arc::new(MockLedger::new());
        ledger.hang_settlements(true);
        let config = LoadConfig::default()
            .with_count(2)
            .with_max_pending(2)
            .with_drain_timeout(Duration::from_secs(5));

        let outcome = run(&ledger, &config, accounts(1)).await;

        assert_eq!(outcome.timed_out, 2);
        assert!(outcome.results.iter().all(|r| r.status == WorkStatus::TimedOut));
        assert!(outcome.results.iter().all(|r| r.latency_ms.is_none()));
        assert!(outcome.duration >= Duration::from_secs(5));
        assert_eq!(outcome.accounts[0].pending(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_issues_nothing() {
        let ledger = Arc::new(MockLedger::new());
        let config = LoadConfig::default().with_count(10);
        let limits = config.limits.resolve(1);
        let submitter =
            Submitter::new(Arc::clone(&ledger), limits, MOCK_CHAIN_ID, NonceRecovery::new(3));
        let producer = TransferProducer::to(U256::from(1), SINK);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let scheduler = Scheduler::new(&config, submitter, producer, accounts(2));
        assert_eq!(scheduler.phase(), Phase::Issuing);
        let outcome = scheduler.run(shutdown).await;

        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.issued, 0);
        assert!(ledger.submissions().is_empty());
    }
}
