use super::aggregator::{AggregationEngine, OfferResult};
use super::dedup::DeduplicationService;
use crate::domain::batch::{Batch, CompletionPolicy};
use crate::domain::dedup::DedupRecord;
use crate::domain::message::Classified;
use crate::error::{CoreError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What to do with a message when the dedup store is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnavailablePolicy {
    /// Reject the message; the caller sees `StoreUnavailable`.
    #[default]
    FailClosed,
    /// Treat the message as new and aggregate it anyway.
    FailOpen,
}

#[derive(Debug)]
pub enum IngestOutcome<M> {
    /// Diverted before aggregation; carries the record that was hit.
    Duplicate(DedupRecord),
    Buffered,
    Completed(Batch<M>),
}

/// Dedup-then-aggregate orchestration.
///
/// The two steps are independent: a crash between them leaves a message
/// recorded as seen but never aggregated.
pub struct PaymentPipeline<M> {
    dedup: Arc<DeduplicationService>,
    engine: AggregationEngine<M>,
    policy: CompletionPolicy,
    ttl: Option<Duration>,
    on_unavailable: UnavailablePolicy,
}

impl<M> PaymentPipeline<M>
where
    M: Classified + Send + Sync + 'static,
{
    pub fn new(
        dedup: Arc<DeduplicationService>,
        engine: AggregationEngine<M>,
        policy: CompletionPolicy,
    ) -> Self {
        Self {
            dedup,
            engine,
            policy,
            ttl: None,
            on_unavailable: UnavailablePolicy::default(),
        }
    }

    /// Dedup records created by this pipeline expire after `ttl`.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_unavailable_policy(mut self, on_unavailable: UnavailablePolicy) -> Self {
        self.on_unavailable = on_unavailable;
        self
    }

    pub async fn ingest(&self, message: M) -> Result<IngestOutcome<M>> {
        let key = message.dedup_key();
        match self
            .dedup
            .check_and_mark(&key, message.message_id(), self.ttl)
            .await
        {
            Ok(outcome) if outcome.is_duplicate => {
                debug!(
                    %key,
                    message_id = message.message_id(),
                    origin = %outcome.record.origin_message_id,
                    "dropping duplicate message"
                );
                return Ok(IngestOutcome::Duplicate(outcome.record));
            }
            Ok(_) => {}
            Err(CoreError::StoreUnavailable(reason))
                if self.on_unavailable == UnavailablePolicy::FailOpen =>
            {
                warn!(%key, %reason, "dedup store unavailable, failing open");
            }
            Err(e) => return Err(e),
        }

        let correlation_key = message.correlation_key().to_string();
        match self.engine.offer(&correlation_key, message, self.policy)? {
            OfferResult::Buffered => Ok(IngestOutcome::Buffered),
            OfferResult::Completed(batch) => Ok(IngestOutcome::Completed(batch)),
        }
    }

    pub fn dedup(&self) -> &DeduplicationService {
        &self.dedup
    }

    pub fn engine(&self) -> &AggregationEngine<M> {
        &self.engine
    }

    /// Flushes every open batch; see [`AggregationEngine::shutdown`].
    pub fn shutdown(&self) -> Vec<Batch<M>> {
        self.engine.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dedup::{DedupKey, EvictionCriteria};
    use crate::domain::message::PaymentMessage;
    use crate::domain::ports::DedupStorage;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::in_memory::InMemoryDedupStorage;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    fn message(id: &str, identifier: &str, correlation_key: &str) -> PaymentMessage {
        PaymentMessage {
            message_id: id.to_string(),
            identifier: identifier.to_string(),
            identifier_type: "InstrId".to_string(),
            correlation_key: correlation_key.to_string(),
            amount: Some(dec!(1.00)),
        }
    }

    fn pipeline_over(storage: crate::domain::ports::DedupStorageBox) -> PaymentPipeline<PaymentMessage> {
        let clock = Arc::new(ManualClock::default());
        let dedup = Arc::new(DeduplicationService::new(storage, clock.clone()));
        let engine = AggregationEngine::new(clock);
        PaymentPipeline::new(dedup, engine, CompletionPolicy::size_only(2))
    }

    #[tokio::test]
    async fn test_duplicates_never_reach_the_engine() {
        let pipeline = pipeline_over(Box::new(InMemoryDedupStorage::new()));

        assert!(matches!(
            pipeline.ingest(message("M1", "INSTR-1", "BATCH-A")).await.unwrap(),
            IngestOutcome::Buffered
        ));
        match pipeline.ingest(message("M2", "INSTR-1", "BATCH-A")).await.unwrap() {
            IngestOutcome::Duplicate(record) => {
                assert_eq!(record.origin_message_id, "M1");
                assert_eq!(record.access_count, 2);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(pipeline.engine().pending_count("BATCH-A"), 1);

        match pipeline.ingest(message("M3", "INSTR-2", "BATCH-A")).await.unwrap() {
            IngestOutcome::Completed(batch) => {
                let ids: Vec<_> = batch.items().iter().map(|m| m.message_id.as_str()).collect();
                assert_eq!(ids, vec!["M1", "M3"]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(pipeline.dedup().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_invalid_key_is_propagated() {
        let pipeline = pipeline_over(Box::new(InMemoryDedupStorage::new()));
        let result = pipeline.ingest(message("M1", "", "BATCH-A")).await;
        assert!(matches!(result, Err(CoreError::InvalidKey(_))));
        assert_eq!(pipeline.engine().active_batches(), 0);
    }

    struct DownStorage;

    #[async_trait]
    impl DedupStorage for DownStorage {
        async fn get(&self, _key: &DedupKey) -> Result<Option<DedupRecord>> {
            Err(CoreError::StoreUnavailable("timeout".to_string()))
        }
        async fn insert_if_absent(&self, _record: DedupRecord) -> Result<Option<DedupRecord>> {
            Err(CoreError::StoreUnavailable("timeout".to_string()))
        }
        async fn update(&self, _record: DedupRecord) -> Result<bool> {
            Err(CoreError::StoreUnavailable("timeout".to_string()))
        }
        async fn delete(&self, _key: &DedupKey) -> Result<bool> {
            Err(CoreError::StoreUnavailable("timeout".to_string()))
        }
        async fn delete_where(&self, _criteria: &EvictionCriteria) -> Result<usize> {
            Err(CoreError::StoreUnavailable("timeout".to_string()))
        }
        async fn count(&self) -> Result<usize> {
            Err(CoreError::StoreUnavailable("timeout".to_string()))
        }
        async fn count_by_type(&self, _identifier_type: &str) -> Result<usize> {
            Err(CoreError::StoreUnavailable("timeout".to_string()))
        }
        async fn clear(&self) -> Result<()> {
            Err(CoreError::StoreUnavailable("timeout".to_string()))
        }
    }

    #[tokio::test]
    async fn test_fail_closed_rejects_message() {
        let pipeline = pipeline_over(Box::new(DownStorage));
        let result = pipeline.ingest(message("M1", "INSTR-1", "BATCH-A")).await;
        assert!(matches!(result, Err(CoreError::StoreUnavailable(_))));
        assert_eq!(pipeline.engine().active_batches(), 0);
    }

    #[tokio::test]
    async fn test_fail_open_aggregates_message() {
        let pipeline = pipeline_over(Box::new(DownStorage))
            .with_unavailable_policy(UnavailablePolicy::FailOpen);
        let outcome = pipeline
            .ingest(message("M1", "INSTR-1", "BATCH-A"))
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Buffered));

        let flushed = pipeline.shutdown();
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].items()[0].message_id, "M1");
    }
}
