//! In-process work queue with keep-existing deduplication and backoff.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Notify};

use super::{BackoffPolicy, QueueSnapshot, WorkEvent, WorkId, WorkRecord, WorkState, WorkTarget};
use crate::error::Error;

/// Finished units kept for the snapshot.
const HISTORY_LIMIT: usize = 100;
/// Failed units kept for reporting, independent of the event stream.
const FAILURE_LIMIT: usize = 100;
const EVENT_CAPACITY: usize = 256;

/// Result of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub id: WorkId,
    /// False when an active unit for the same target was kept instead.
    pub created: bool,
}

/// A unit handed to a worker.
#[derive(Debug, Clone)]
pub struct Claim {
    pub id: WorkId,
    pub target: WorkTarget,
    pub attempt: u32,
    /// Stop signal for this attempt only. Raised when the unit is cancelled
    /// while running, or by the worker when the attempt times out.
    pub cancel: Arc<AtomicBool>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<WorkId, WorkRecord>,
    /// Active units in enqueue order.
    order: Vec<WorkId>,
    ready: VecDeque<WorkId>,
    /// Flag of the running attempt, per unit.
    cancel_flags: HashMap<WorkId, Arc<AtomicBool>>,
    history: VecDeque<WorkRecord>,
    failures: VecDeque<WorkRecord>,
    failed_total: usize,
    closed: bool,
}

impl Inner {
    fn active_for(&self, target: WorkTarget) -> Option<WorkId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.records.get(id).is_some_and(|r| r.target == target))
    }

    fn insert(&mut self, target: WorkTarget) -> WorkId {
        let record = WorkRecord::new(target);
        let id = record.id;
        self.records.insert(id, record);
        self.order.push(id);
        self.ready.push_back(id);
        id
    }

    /// Move a unit to a terminal state and into the history.
    fn finish(&mut self, id: WorkId, state: WorkState) -> Option<WorkRecord> {
        let mut record = self.records.remove(&id)?;
        record.state = state;
        record.finished_at = Some(Instant::now());
        self.order.retain(|other| *other != id);
        self.ready.retain(|other| *other != id);
        self.cancel_flags.remove(&id);

        if state == WorkState::Failed {
            self.failed_total += 1;
            self.failures.push_back(record.clone());
            while self.failures.len() > FAILURE_LIMIT {
                self.failures.pop_front();
            }
        }
        self.history.push_back(record.clone());
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        Some(record)
    }

    fn snapshot(&self) -> QueueSnapshot {
        let active: Vec<WorkRecord> = self
            .order
            .iter()
            .filter_map(|id| self.records.get(id).cloned())
            .collect();
        let count = |state: WorkState| active.iter().filter(|r| r.state == state).count();
        QueueSnapshot {
            queued: count(WorkState::Queued),
            running: count(WorkState::Running),
            retrying: count(WorkState::Retrying),
            recent: self.history.iter().cloned().collect(),
            active,
        }
    }
}

/// Shared queue feeding the worker pool.
///
/// State lives behind a std mutex that is never held across an await. The
/// current [`QueueSnapshot`] is published on a watch channel and every
/// transition on a broadcast channel.
pub struct WorkQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    backoff: BackoffPolicy,
    snapshot_tx: watch::Sender<QueueSnapshot>,
    events: broadcast::Sender<WorkEvent>,
}

impl WorkQueue {
    pub fn new(backoff: BackoffPolicy) -> Self {
        let (snapshot_tx, _) = watch::channel(QueueSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            backoff,
            snapshot_tx,
            events,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Events go out before the snapshot, so a snapshot watcher that sees the
    /// queue idle can already receive every event that led there.
    fn publish(&self, inner: &Inner, events: Vec<WorkEvent>) {
        for event in events {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
        self.snapshot_tx.send_replace(inner.snapshot());
    }

    /// Enqueue `target` unless an active unit for it exists.
    ///
    /// If the existing unit is already running it is flagged to run once more
    /// after it succeeds, so changes that arrive mid-run are not lost.
    pub fn enqueue(&self, target: WorkTarget) -> Enqueued {
        let mut inner = self.lock();
        let mut events = Vec::new();
        let enqueued = Self::enqueue_locked(&mut inner, target, &mut events);
        if enqueued.created {
            self.publish(&inner, events);
            drop(inner);
            self.notify.notify_waiters();
        }
        enqueued
    }

    fn enqueue_locked(inner: &mut Inner, target: WorkTarget, events: &mut Vec<WorkEvent>) -> Enqueued {
        if let Some(id) = inner.active_for(target) {
            if let Some(record) = inner.records.get_mut(&id) {
                if record.state == WorkState::Running {
                    record.rerun_requested = true;
                }
            }
            tracing::trace!(%target, %id, "Keeping existing work unit");
            return Enqueued { id, created: false };
        }

        let id = inner.insert(target);
        tracing::debug!(%target, %id, "Work queued");
        events.push(WorkEvent::Queued { id, target });
        Enqueued { id, created: true }
    }

    fn try_claim(&self) -> Option<Claim> {
        let mut inner = self.lock();
        while let Some(id) = inner.ready.pop_front() {
            let Some(record) = inner.records.get_mut(&id) else {
                continue;
            };
            if !matches!(record.state, WorkState::Queued | WorkState::Retrying) {
                continue;
            }
            record.state = WorkState::Running;
            record.attempts += 1;
            // A flag raised on an earlier attempt must not reach this one
            let cancel = Arc::new(AtomicBool::new(false));
            let claim = Claim {
                id,
                target: record.target,
                attempt: record.attempts,
                cancel: Arc::clone(&cancel),
            };
            inner.cancel_flags.insert(id, cancel);
            let event = WorkEvent::Started {
                id,
                target: claim.target,
                attempt: claim.attempt,
            };
            self.publish(&inner, vec![event]);
            return Some(claim);
        }
        None
    }

    /// Wait for the next runnable unit. Returns `None` once the queue is closed.
    pub async fn next(&self) -> Option<Claim> {
        loop {
            // Registered before checking so a concurrent enqueue is not missed
            let notified = self.notify.notified();
            if self.lock().closed {
                return None;
            }
            if let Some(claim) = self.try_claim() {
                return Some(claim);
            }
            notified.await;
        }
    }

    /// Record a successful run.
    pub fn succeed(&self, id: WorkId) {
        self.complete(id, &[]);
    }

    /// Record a successful run and enqueue its follow-up work in one step, so
    /// the queue never looks idle in between.
    pub fn complete(&self, id: WorkId, follow_ups: &[WorkTarget]) {
        let mut inner = self.lock();
        let Some(record) = inner.finish(id, WorkState::Succeeded) else {
            return;
        };
        let target = record.target;
        tracing::debug!(%target, %id, attempts = record.attempts, "Work succeeded");
        let mut events = vec![WorkEvent::Succeeded { id, target }];

        if !inner.closed {
            if record.rerun_requested {
                Self::enqueue_locked(&mut inner, target, &mut events);
            }
            for follow_up in follow_ups {
                Self::enqueue_locked(&mut inner, *follow_up, &mut events);
            }
        }
        self.publish(&inner, events);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Record a failed run.
    ///
    /// Returns the backoff delay when the unit will be retried. After the
    /// delay the caller must hand it back with [`release`](Self::release).
    pub fn fail(&self, id: WorkId, error: &Error) -> Option<Duration> {
        let mut inner = self.lock();
        let record = inner.records.get_mut(&id)?;
        let target = record.target;
        let attempt = record.attempts;
        let message = error.to_string();
        record.last_error = Some(message.clone());

        if record.cancel_requested {
            inner.finish(id, WorkState::Cancelled);
            tracing::info!(%target, %id, "Work cancelled");
            self.publish(&inner, vec![WorkEvent::Cancelled { id, target }]);
            return None;
        }

        let delay = error
            .is_retryable()
            .then(|| self.backoff.delay_for(attempt))
            .flatten();

        match delay {
            Some(delay) => {
                record.state = WorkState::Retrying;
                tracing::info!(%target, %id, attempt, ?delay, error = %message, "Work failed, retrying");
                let event = WorkEvent::Retrying {
                    id,
                    target,
                    attempt,
                    delay,
                    error: message,
                };
                self.publish(&inner, vec![event]);
                Some(delay)
            }
            None => {
                inner.finish(id, WorkState::Failed);
                tracing::warn!(%target, %id, attempts = attempt, error = %message, "Work failed");
                self.publish(&inner, vec![WorkEvent::Failed { id, target, error: message }]);
                None
            }
        }
    }

    /// Make a unit that waited out its backoff runnable again.
    pub fn release(&self, id: WorkId) {
        let mut inner = self.lock();
        let retrying = inner
            .records
            .get(&id)
            .is_some_and(|r| r.state == WorkState::Retrying);
        if !retrying || inner.ready.contains(&id) {
            return;
        }
        inner.ready.push_back(id);
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Cancel a unit.
    ///
    /// Queued and retrying units stop immediately. A running unit is flagged:
    /// it runs to completion, and a failure is then recorded as cancelled
    /// instead of being retried. Returns false for unknown or finished units.
    pub fn cancel(&self, id: WorkId) -> bool {
        let mut inner = self.lock();
        let Some(record) = inner.records.get_mut(&id) else {
            return false;
        };
        let target = record.target;

        if record.state == WorkState::Running {
            record.cancel_requested = true;
            record.rerun_requested = false;
            if let Some(flag) = inner.cancel_flags.get(&id) {
                flag.store(true, Ordering::SeqCst);
            }
            tracing::debug!(%target, %id, "Cancellation requested for running work");
            self.publish(&inner, Vec::new());
            return true;
        }

        inner.finish(id, WorkState::Cancelled);
        tracing::info!(%target, %id, "Work cancelled");
        self.publish(&inner, vec![WorkEvent::Cancelled { id, target }]);
        true
    }

    /// Cancel the active unit for `target`, if any.
    pub fn cancel_target(&self, target: WorkTarget) -> bool {
        let id = self.lock().active_for(target);
        id.is_some_and(|id| self.cancel(id))
    }

    /// Cancel scans of a watch folder that is being removed.
    pub fn cancel_folder(&self, folder_id: i64) -> bool {
        self.cancel_target(WorkTarget::FolderScan { folder_id })
    }

    pub fn record(&self, id: WorkId) -> Option<WorkRecord> {
        let inner = self.lock();
        inner
            .records
            .get(&id)
            .cloned()
            .or_else(|| inner.history.iter().rev().find(|r| r.id == id).cloned())
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.lock().snapshot()
    }

    /// The most recent failed units, oldest first.
    pub fn failures(&self) -> Vec<WorkRecord> {
        self.lock().failures.iter().cloned().collect()
    }

    /// Units that ended failed since the queue was created.
    pub fn failed_total(&self) -> usize {
        self.lock().failed_total
    }

    /// Current value plus change stream of the queue.
    pub fn watch(&self) -> watch::Receiver<QueueSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkEvent> {
        self.events.subscribe()
    }

    /// Wait until no unit is queued, running or retrying.
    pub async fn wait_idle(&self) {
        let mut rx = self.watch();
        // The sender lives as long as self, so this only ends once idle
        let _ = rx.wait_for(|snapshot| snapshot.is_idle()).await;
    }

    /// Stop handing out work. Workers waiting in [`next`](Self::next) return `None`.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
