//! Work-queue abstraction for the background pipeline.
//!
//! A unit of work moves `Queued -> Running -> {Succeeded, Retrying, Failed}`.
//! `Retrying` re-enters `Running` after a backoff delay until the retry budget
//! is spent. Units are unique by [`WorkTarget`]: enqueueing a target that is
//! already active returns the existing unit.

pub mod queue;

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::config::PipelineConfig;

pub use queue::{Claim, Enqueued, WorkQueue};

/// Unique identifier for a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkId(pub u64);

impl WorkId {
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        WorkId(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a unit of work operates on. Doubles as the deduplication key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkTarget {
    GlobalSync,
    FolderScan { folder_id: i64 },
    ExtractFaces { photo_id: i64 },
    Clustering,
}

impl WorkTarget {
    /// Full display name for logs and listings.
    pub fn display_name(&self) -> &'static str {
        match self {
            WorkTarget::GlobalSync => "Library Sync",
            WorkTarget::FolderScan { .. } => "Folder Scan",
            WorkTarget::ExtractFaces { .. } => "Face Extraction",
            WorkTarget::Clustering => "Face Clustering",
        }
    }
}

impl std::fmt::Display for WorkTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkTarget::FolderScan { folder_id } => write!(f, "{} (folder {})", self.display_name(), folder_id),
            WorkTarget::ExtractFaces { photo_id } => write!(f, "{} (photo {})", self.display_name(), photo_id),
            _ => f.write_str(self.display_name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkState {
    Queued,
    Running,
    /// Waiting out a backoff delay before the next attempt.
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
}

impl WorkState {
    /// Queued, running or waiting to retry. Active units block duplicates.
    pub fn is_active(&self) -> bool {
        matches!(self, WorkState::Queued | WorkState::Running | WorkState::Retrying)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

/// Exponential backoff: retry `k` (1-based) waits `base_delay * 2^(k-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    /// Attempts allowed after the first run.
    pub max_retries: u32,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self { base_delay, max_retries }
    }

    /// Delay before retry `retry`, or `None` once the budget is spent.
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.max_retries {
            return None;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor))
    }
}

impl From<&PipelineConfig> for BackoffPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self::new(config.retry_base_delay(), config.max_retry_attempts)
    }
}

/// A unit of work as tracked by the queue.
#[derive(Debug, Clone, Serialize)]
pub struct WorkRecord {
    pub id: WorkId,
    pub target: WorkTarget,
    pub state: WorkState,
    /// Runs started so far, including the current one.
    pub attempts: u32,
    pub last_error: Option<String>,
    #[serde(skip)]
    pub enqueued_at: Instant,
    #[serde(skip)]
    pub finished_at: Option<Instant>,
    /// Set when cancellation was requested while the unit was running.
    pub cancel_requested: bool,
    /// Set when the same target was enqueued while this unit was running.
    pub rerun_requested: bool,
}

impl WorkRecord {
    pub fn new(target: WorkTarget) -> Self {
        Self {
            id: WorkId::new(),
            target,
            state: WorkState::Queued,
            attempts: 0,
            last_error: None,
            enqueued_at: Instant::now(),
            finished_at: None,
            cancel_requested: false,
            rerun_requested: false,
        }
    }

    /// Time since the unit was enqueued, or its total lifetime once finished.
    pub fn elapsed(&self) -> Duration {
        match self.finished_at {
            Some(done) => done.duration_since(self.enqueued_at),
            None => self.enqueued_at.elapsed(),
        }
    }
}

/// State changes published by the queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkEvent {
    Queued { id: WorkId, target: WorkTarget },
    Started { id: WorkId, target: WorkTarget, attempt: u32 },
    Succeeded { id: WorkId, target: WorkTarget },
    Retrying {
        id: WorkId,
        target: WorkTarget,
        attempt: u32,
        #[serde(skip)]
        delay: Duration,
        error: String,
    },
    Failed { id: WorkId, target: WorkTarget, error: String },
    Cancelled { id: WorkId, target: WorkTarget },
}

impl WorkEvent {
    pub fn id(&self) -> WorkId {
        match self {
            WorkEvent::Queued { id, .. }
            | WorkEvent::Started { id, .. }
            | WorkEvent::Succeeded { id, .. }
            | WorkEvent::Retrying { id, .. }
            | WorkEvent::Failed { id, .. }
            | WorkEvent::Cancelled { id, .. } => *id,
        }
    }
}

/// Current value of the queue, published after every change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    pub queued: usize,
    pub running: usize,
    pub retrying: usize,
    /// Active units in enqueue order.
    pub active: Vec<WorkRecord>,
    /// Most recently finished units, newest last.
    pub recent: Vec<WorkRecord>,
}

impl QueueSnapshot {
    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }
}
