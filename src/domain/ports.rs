use super::batch::Batch;
use super::dedup::{DedupKey, DedupRecord, EvictionCriteria};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::task::AbortHandle;

/// Persistence behind the deduplication service.
///
/// Implementations only promise per-operation atomicity; the service layers
/// per-key serialization on top.
#[async_trait]
pub trait DedupStorage: Send + Sync {
    async fn get(&self, key: &DedupKey) -> Result<Option<DedupRecord>>;
    /// Stores `record` unless its key is taken, in which case the existing record is returned.
    async fn insert_if_absent(&self, record: DedupRecord) -> Result<Option<DedupRecord>>;
    /// Replaces the record with the same key. Returns `false` if there was none.
    async fn update(&self, record: DedupRecord) -> Result<bool>;
    async fn delete(&self, key: &DedupKey) -> Result<bool>;
    async fn delete_where(&self, criteria: &EvictionCriteria) -> Result<usize>;
    async fn count(&self) -> Result<usize>;
    async fn count_by_type(&self, identifier_type: &str) -> Result<usize>;
    async fn clear(&self) -> Result<()>;
}

pub type DedupStorageBox = Box<dyn DedupStorage>;
pub type DedupStorageFactory = Box<dyn Fn() -> DedupStorageBox + Send + Sync>;

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Time source and one-shot timer scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Runs `callback` once after `delay` unless the returned handle is
    /// cancelled first. Must never invoke `callback` before returning.
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;
}

pub type ClockRef = Arc<dyn Clock>;

/// Cancellation token for a scheduled callback. Dropping it cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    task: Option<AbortHandle>,
}

impl TimerHandle {
    /// `cancelled` is the flag the scheduler checks before firing; `task`
    /// is aborted on cancel when the timer runs as a tokio task.
    pub fn new(cancelled: Arc<AtomicBool>, task: Option<AbortHandle>) -> Self {
        Self { cancelled, task }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Downstream failure while handing over a completed batch.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SinkError {
    #[error("Flush sink is closed")]
    Closed,
    #[error("Flush sink rejected batch: {0}")]
    Rejected(String),
}

/// Receives every completed batch exactly once.
pub trait FlushSink<T>: Send + Sync {
    fn deliver(&self, batch: Batch<T>) -> std::result::Result<(), SinkError>;
}

pub type FlushSinkRef<T> = Arc<dyn FlushSink<T>>;
