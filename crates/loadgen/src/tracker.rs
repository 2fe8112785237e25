//! Background settlement tracking.

use std::sync::Arc;

use alloy_primitives::TxHash;
use tokio::{sync::mpsc, task::JoinSet};
use tracing::debug;

use crate::{Ledger, LedgerError, Settlement, SignedUnit, Submission};

/// Identifies one issued unit between the scheduler and its tracker task.
pub type Ticket = u64;

/// What happened to a tracked unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEventKind {
    /// A gated unit was accepted by the node.
    Submitted(Submission),
    /// A gated unit was rejected by the node.
    Rejected(LedgerError),
    /// The unit settled.
    Settled(Settlement),
    /// The unit could not be settled.
    Failed(LedgerError),
}

/// Message from a tracker task to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerEvent {
    /// Unit the event refers to.
    pub ticket: Ticket,
    /// What happened.
    pub kind: TrackerEventKind,
}

/// Spawns one task per unit that awaits its settlement and reports back over a
/// channel.
///
/// Tasks never touch account state. The single receiver applies every event, so
/// account updates and result appends are serialized without locks.
#[derive(Debug)]
pub struct Tracker<L: ?Sized> {
    ledger: Arc<L>,
    events: mpsc::UnboundedSender<TrackerEvent>,
    tasks: JoinSet<()>,
}

impl<L: Ledger + ?Sized> Tracker<L> {
    /// Creates a tracker and the receiving end of its event channel.
    pub fn new(ledger: Arc<L>) -> (Self, mpsc::UnboundedReceiver<TrackerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { ledger, events, tasks: JoinSet::new() }, rx)
    }

    /// Awaits settlement of an accepted unit in the background.
    pub fn track(&mut self, ticket: Ticket, handle: TxHash) {
        let ledger = Arc::clone(&self.ledger);
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let kind = settle(ledger.as_ref(), handle).await;
            let _ = events.send(TrackerEvent { ticket, kind });
        });
    }

    /// Submits a unit and awaits its settlement as one background step.
    pub fn submit_and_track(&mut self, ticket: Ticket, unit: SignedUnit) {
        let ledger = Arc::clone(&self.ledger);
        let events = self.events.clone();
        self.tasks.spawn(async move {
            let submission = match ledger.submit(unit).await {
                Ok(submission) => submission,
                Err(e) => {
                    let kind = TrackerEventKind::Rejected(e);
                    let _ = events.send(TrackerEvent { ticket, kind });
                    return;
                }
            };
            let handle = submission.handle;
            let kind = TrackerEventKind::Submitted(submission);
            let _ = events.send(TrackerEvent { ticket, kind });
            let kind = settle(ledger.as_ref(), handle).await;
            let _ = events.send(TrackerEvent { ticket, kind });
        });
    }

    /// Number of tasks not yet reaped.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns `true` if no tasks remain.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Reaps finished tasks without blocking.
    pub fn reap(&mut self) {
        while self.tasks.try_join_next().is_some() {}
    }

    /// Cancels every outstanding task.
    pub fn abort_all(&mut self) {
        let outstanding = self.tasks.len();
        self.tasks.abort_all();
        if outstanding > 0 {
            debug!(outstanding, "Aborted tracker tasks");
        }
    }
}

async fn settle<L: Ledger + ?Sized>(ledger: &L, handle: TxHash) -> TrackerEventKind {
    match ledger.await_settlement(handle).await {
        Ok(settlement) => TrackerEventKind::Settled(settlement),
        Err(e) => TrackerEventKind::Failed(e),
    }
}
