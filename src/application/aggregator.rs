use crate::domain::batch::{
    AccumulatorClosed, Batch, BatchAccumulator, CompletionPolicy, CompletionReason,
};
use crate::domain::ports::{ClockRef, FlushSinkRef};
use crate::error::{CoreError, Result};
use crate::sharding::shard_index;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

type SharedAccumulator<T> = Arc<Mutex<BatchAccumulator<T>>>;
type Shard<T> = RwLock<HashMap<String, SharedAccumulator<T>>>;

/// Outcome of [`AggregationEngine::offer`].
#[derive(Debug)]
pub enum OfferResult<T> {
    /// The item is stored; its accumulator is still open.
    Buffered,
    /// This call's item closed the batch. No other caller receives it.
    Completed(Batch<T>),
}

impl<T> OfferResult<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, OfferResult::Completed(_))
    }

    pub fn into_batch(self) -> Option<Batch<T>> {
        match self {
            OfferResult::Completed(batch) => Some(batch),
            OfferResult::Buffered => None,
        }
    }
}

/// Groups items by correlation key and releases each group exactly once,
/// when it reaches its size threshold, when its timeout fires, or on demand.
///
/// Lock order is accumulator first, then shard. Completion flips the
/// accumulator's flag and unlinks it from the live map inside one critical
/// section, so an offer that loses the race finds the flag set, drops the
/// stale accumulator and starts a new one.
///
/// Every path that completes a batch holds a read guard on the delivery gate
/// until the sink has the batch; [`AggregationEngine::shutdown`] takes the
/// write side last, so it returns only once all completed batches are delivered.
///
/// `Clone` shares the same engine.
pub struct AggregationEngine<T> {
    inner: Arc<EngineInner<T>>,
}

impl<T> Clone for AggregationEngine<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<T> {
    shards: Vec<Shard<T>>,
    clock: ClockRef,
    sink: Option<FlushSinkRef<T>>,
    next_batch_id: AtomicU64,
    shut_down: AtomicBool,
    delivery_gate: RwLock<()>,
}

enum Located<T> {
    /// A new accumulator was created around the offered item.
    Created(SharedAccumulator<T>),
    /// An accumulator already existed; the item still has to be appended.
    Existing(SharedAccumulator<T>, T),
}

impl<T: Send + Sync + 'static> AggregationEngine<T> {
    pub const DEFAULT_SHARDS: usize = 16;

    pub fn new(clock: ClockRef) -> Self {
        Self::build(clock, None, Self::DEFAULT_SHARDS)
    }

    pub fn with_sink(clock: ClockRef, sink: FlushSinkRef<T>) -> Self {
        Self::build(clock, Some(sink), Self::DEFAULT_SHARDS)
    }

    /// A shard count of zero is bumped to one.
    pub fn build(clock: ClockRef, sink: Option<FlushSinkRef<T>>, shards: usize) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                shards: (0..shards.max(1))
                    .map(|_| RwLock::new(HashMap::new()))
                    .collect(),
                clock,
                sink,
                next_batch_id: AtomicU64::new(1),
                shut_down: AtomicBool::new(false),
                delivery_gate: RwLock::new(()),
            }),
        }
    }

    /// Adds `item` to the open batch for `correlation_key`, creating one
    /// (with `policy`) if there is none. The policy of an open batch is fixed
    /// when it is created.
    pub fn offer(
        &self,
        correlation_key: &str,
        item: T,
        policy: CompletionPolicy,
    ) -> Result<OfferResult<T>> {
        if correlation_key.is_empty() {
            return Err(CoreError::InvalidKey(
                "correlation key must not be empty".to_string(),
            ));
        }
        policy.validate()?;
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(CoreError::EngineShutDown);
        }

        let _delivering = self.inner.delivery_gate.read_recursive();
        let mut item = item;
        loop {
            match self.inner.locate(correlation_key, item, policy)? {
                Located::Created(accumulator) => {
                    return Ok(self.inner.settle_created(&accumulator));
                }
                Located::Existing(accumulator, pending) => {
                    let mut guard = accumulator.lock();
                    match guard.append(pending) {
                        Ok(_) if guard.is_full() => {
                            let batch = self.inner.complete_locked(
                                &accumulator,
                                &mut guard,
                                CompletionReason::Size,
                            );
                            drop(guard);
                            return Ok(self.inner.hand_over(batch));
                        }
                        Ok(_) => return Ok(OfferResult::Buffered),
                        Err(AccumulatorClosed(returned)) => {
                            // Lost a race against completion; the item starts the next batch.
                            drop(guard);
                            self.inner.unlink(correlation_key, &accumulator);
                            item = returned;
                        }
                    }
                }
            }
        }
    }

    /// Forces completion of the open batch for `correlation_key`, if any.
    pub fn flush_now(&self, correlation_key: &str) -> Option<Batch<T>> {
        let _delivering = self.inner.delivery_gate.read_recursive();
        let accumulator = self.inner.get(correlation_key)?;
        let batch = {
            let mut guard = accumulator.lock();
            self.inner
                .complete_locked(&accumulator, &mut guard, CompletionReason::Manual)
        }?;
        self.inner.deliver(&batch);
        Some(batch)
    }

    /// Items currently buffered for `correlation_key`.
    pub fn pending_count(&self, correlation_key: &str) -> usize {
        self.inner
            .get(correlation_key)
            .map(|accumulator| {
                let guard = accumulator.lock();
                if guard.is_completed() { 0 } else { guard.len() }
            })
            .unwrap_or(0)
    }

    /// Number of open batches across all keys.
    pub fn active_batches(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Stops accepting offers, cancels every pending timer and completes all
    /// open batches with [`CompletionReason::Manual`].
    ///
    /// Blocks until batches completed concurrently by timers or offers have
    /// reached the sink. Must not be called from inside a sink.
    pub fn shutdown(&self) -> Vec<Batch<T>> {
        self.inner.shut_down.store(true, Ordering::Release);

        let mut open = Vec::new();
        for shard in &self.inner.shards {
            open.extend(shard.read().values().cloned());
        }

        let mut flushed = Vec::new();
        for accumulator in open {
            let batch = {
                let mut guard = accumulator.lock();
                self.inner
                    .complete_locked(&accumulator, &mut guard, CompletionReason::Manual)
            };
            if let Some(batch) = batch {
                self.inner.deliver(&batch);
                flushed.push(batch);
            }
        }
        drop(self.inner.delivery_gate.write());
        info!(flushed = flushed.len(), "aggregation engine shut down");
        flushed
    }
}

impl<T: Send + Sync + 'static> EngineInner<T> {
    fn shard(&self, correlation_key: &str) -> &Shard<T> {
        &self.shards[shard_index(correlation_key, self.shards.len())]
    }

    fn get(&self, correlation_key: &str) -> Option<SharedAccumulator<T>> {
        self.shard(correlation_key).read().get(correlation_key).cloned()
    }

    fn locate(
        &self,
        correlation_key: &str,
        item: T,
        policy: CompletionPolicy,
    ) -> Result<Located<T>> {
        if let Some(existing) = self.get(correlation_key) {
            return Ok(Located::Existing(existing, item));
        }

        let mut live = self.shard(correlation_key).write();
        if let Some(existing) = live.get(correlation_key) {
            return Ok(Located::Existing(Arc::clone(existing), item));
        }
        // Checked again under the shard lock so no batch opens after the shutdown drain.
        if self.shut_down.load(Ordering::Acquire) {
            return Err(CoreError::EngineShutDown);
        }
        let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        let accumulator = Arc::new(Mutex::new(BatchAccumulator::new(
            id,
            correlation_key,
            item,
            policy,
            self.clock.now(),
        )));
        live.insert(correlation_key.to_string(), Arc::clone(&accumulator));
        debug!(correlation_key, batch_id = id, "opened batch");
        Ok(Located::Created(accumulator))
    }

    /// Finishes an offer that created `accumulator`: completes it right away
    /// for a threshold of one, otherwise arms its timeout.
    fn settle_created(self: &Arc<Self>, accumulator: &SharedAccumulator<T>) -> OfferResult<T> {
        let mut guard = accumulator.lock();
        if guard.is_completed() {
            // Another offer filled and closed it before we got the lock.
            return OfferResult::Buffered;
        }
        if guard.is_full() {
            let batch = self.complete_locked(accumulator, &mut guard, CompletionReason::Size);
            drop(guard);
            return self.hand_over(batch);
        }

        let policy = guard.policy();
        if policy.has_timeout() {
            let engine = Arc::downgrade(self);
            let target = Arc::downgrade(accumulator);
            let timer = self.clock.schedule(
                policy.timeout,
                Box::new(move || Self::on_timeout(&engine, &target)),
            );
            guard.attach_timer(timer);
        }
        OfferResult::Buffered
    }

    /// Timer callback. Bound to one accumulator instance, so it can never
    /// close a newer batch that reuses the same key.
    fn on_timeout(engine: &Weak<Self>, target: &Weak<Mutex<BatchAccumulator<T>>>) {
        let (Some(engine), Some(accumulator)) = (engine.upgrade(), target.upgrade()) else {
            return;
        };
        let _delivering = engine.delivery_gate.read_recursive();
        let batch = {
            let mut guard = accumulator.lock();
            engine.complete_locked(&accumulator, &mut guard, CompletionReason::Timeout)
        };
        if let Some(batch) = batch {
            engine.deliver(&batch);
        }
    }

    /// Completes the locked accumulator and unlinks it from the live map.
    /// Returns `None` if it was already completed.
    fn complete_locked(
        &self,
        accumulator: &SharedAccumulator<T>,
        guard: &mut BatchAccumulator<T>,
        reason: CompletionReason,
    ) -> Option<Batch<T>> {
        let batch = guard.complete(reason, self.clock.now())?;
        self.unlink(guard.correlation_key(), accumulator);
        info!(
            correlation_key = guard.correlation_key(),
            batch_id = guard.id(),
            items = batch.len(),
            %reason,
            "batch completed"
        );
        Some(batch)
    }

    /// Removes `accumulator` from the live map unless a newer one already took its slot.
    fn unlink(&self, correlation_key: &str, accumulator: &SharedAccumulator<T>) {
        let mut live = self.shard(correlation_key).write();
        if live
            .get(correlation_key)
            .is_some_and(|current| Arc::ptr_eq(current, accumulator))
        {
            live.remove(correlation_key);
        }
    }

    fn hand_over(&self, batch: Option<Batch<T>>) -> OfferResult<T> {
        match batch {
            Some(batch) => {
                self.deliver(&batch);
                OfferResult::Completed(batch)
            }
            None => OfferResult::Buffered,
        }
    }

    /// Sink failures are logged, never retried: the batch counts as delivered.
    fn deliver(&self, batch: &Batch<T>) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(e) = sink.deliver(batch.clone()) {
            warn!(
                correlation_key = %batch.correlation_key,
                batch_id = batch.id,
                error = %e,
                "flush sink failed"
            );
        }
    }
}
