use super::ports::TimerHandle;
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What closed a batch.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CompletionReason {
    Size,
    Timeout,
    Manual,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CompletionReason::Size => "size",
            CompletionReason::Timeout => "timeout",
            CompletionReason::Manual => "manual",
        };
        f.write_str(label)
    }
}

/// Size and timeout triggers for an accumulator.
///
/// A `timeout` of zero disables timeout completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionPolicy {
    pub size_threshold: usize,
    pub timeout: Duration,
}

impl CompletionPolicy {
    pub fn new(size_threshold: usize, timeout: Duration) -> Self {
        Self {
            size_threshold,
            timeout,
        }
    }

    pub fn size_only(size_threshold: usize) -> Self {
        Self::new(size_threshold, Duration::ZERO)
    }

    pub fn validate(&self) -> Result<()> {
        if self.size_threshold == 0 {
            return Err(CoreError::InvalidPolicy(
                "size threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn has_timeout(&self) -> bool {
        !self.timeout.is_zero()
    }
}

/// An immutable snapshot of a completed accumulator.
///
/// Items are shared, so cloning a batch to hand it to both the caller and the
/// flush sink does not copy the payloads.
#[derive(Debug)]
pub struct Batch<T> {
    pub id: u64,
    pub correlation_key: String,
    pub reason: CompletionReason,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    items: Arc<[T]>,
}

impl<T> Batch<T> {
    /// Items in the order they were admitted to the accumulator.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Clone for Batch<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            correlation_key: self.correlation_key.clone(),
            reason: self.reason,
            created_at: self.created_at,
            completed_at: self.completed_at,
            items: Arc::clone(&self.items),
        }
    }
}

/// Returned by [`BatchAccumulator::append`] when the accumulator already completed.
/// Hands the item back so the caller can start a fresh accumulator with it.
pub(crate) struct AccumulatorClosed<T>(pub T);

/// Mutable buffer for one correlation key, owned by the aggregation engine.
///
/// Every method assumes the caller holds the accumulator's mutex; `completed`
/// flips at most once.
pub(crate) struct BatchAccumulator<T> {
    id: u64,
    correlation_key: String,
    items: Vec<T>,
    created_at: DateTime<Utc>,
    policy: CompletionPolicy,
    completed: Option<CompletionReason>,
    timer: Option<TimerHandle>,
}

impl<T> BatchAccumulator<T> {
    /// Accumulators are born holding their first item.
    pub fn new(
        id: u64,
        correlation_key: impl Into<String>,
        first_item: T,
        policy: CompletionPolicy,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            correlation_key: correlation_key.into(),
            items: vec![first_item],
            created_at,
            policy,
            completed: None,
            timer: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn correlation_key(&self) -> &str {
        &self.correlation_key
    }

    pub fn policy(&self) -> CompletionPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.is_some()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.policy.size_threshold
    }

    pub fn append(&mut self, item: T) -> std::result::Result<usize, AccumulatorClosed<T>> {
        if self.is_completed() {
            return Err(AccumulatorClosed(item));
        }
        self.items.push(item);
        Ok(self.items.len())
    }

    /// Keeps the timeout timer so completion can cancel it. A timer attached
    /// after completion is cancelled right away.
    pub fn attach_timer(&mut self, timer: TimerHandle) {
        if self.is_completed() {
            timer.cancel();
        } else {
            self.timer = Some(timer);
        }
    }

    /// Closes the accumulator and takes its items. Returns `None` if another
    /// path already completed it.
    pub fn complete(
        &mut self,
        reason: CompletionReason,
        completed_at: DateTime<Utc>,
    ) -> Option<Batch<T>> {
        if self.is_completed() {
            return None;
        }
        self.completed = Some(reason);
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }

        let items = std::mem::take(&mut self.items);
        Some(Batch {
            id: self.id,
            correlation_key: self.correlation_key.clone(),
            reason,
            created_at: self.created_at,
            completed_at,
            items: Arc::from(items),
        })
    }
}
