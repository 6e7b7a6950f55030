use paybatch::application::aggregator::AggregationEngine;
use paybatch::domain::batch::{Batch, CompletionPolicy, CompletionReason};
use paybatch::domain::ports::{ClockRef, FlushSinkRef};
use paybatch::infrastructure::clock::TokioClock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn engine_with_channel() -> (
    AggregationEngine<u32>,
    mpsc::UnboundedReceiver<Batch<u32>>,
) {
    let clock: ClockRef = Arc::new(TokioClock::current().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    let sink: FlushSinkRef<u32> = Arc::new(tx);
    (AggregationEngine::with_sink(clock, sink), rx)
}

#[tokio::test]
async fn test_timeout_completes_batch_once() {
    let (engine, mut rx) = engine_with_channel();
    let policy = CompletionPolicy::new(100, Duration::from_millis(50));

    engine.offer("BATCH-A", 1, policy).unwrap();
    engine.offer("BATCH-A", 2, policy).unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timeout batch was not delivered")
        .unwrap();

    assert_eq!(batch.reason, CompletionReason::Timeout);
    assert_eq!(batch.items(), &[1, 2]);
    assert_eq!(engine.pending_count("BATCH-A"), 0);

    // Nothing else arrives for the same accumulator
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_size_completion_disarms_timer() {
    let (engine, mut rx) = engine_with_channel();
    let policy = CompletionPolicy::new(2, Duration::from_millis(30));

    engine.offer("BATCH-A", 1, policy).unwrap();
    let result = engine.offer("BATCH-A", 2, policy).unwrap();
    assert!(result.is_completed());

    let batch = rx.recv().await.unwrap();
    assert_eq!(batch.reason, CompletionReason::Size);

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_item_after_timeout_opens_new_batch() {
    let (engine, mut rx) = engine_with_channel();
    let policy = CompletionPolicy::new(100, Duration::from_millis(20));

    engine.offer("BATCH-A", 1, policy).unwrap();
    let first = rx.recv().await.unwrap();
    assert_eq!(first.items(), &[1]);

    engine.offer("BATCH-A", 2, policy).unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(second.items(), &[2]);
    assert_ne!(first.id, second.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_drain_after_shutdown_sees_every_timeout_batch() {
    let (engine, mut rx) = engine_with_channel();
    let policy = CompletionPolicy::new(1000, Duration::from_millis(1));

    let mut offered = 0;
    for round in 0..20u32 {
        for key in 0..25u32 {
            engine.offer(&format!("BATCH-{key}"), round, policy).unwrap();
            offered += 1;
        }
        tokio::task::yield_now().await;
    }

    engine.shutdown();
    drop(engine);

    let mut received = 0;
    while let Some(batch) = rx.recv().await {
        received += batch.len();
    }
    assert_eq!(received, offered);
}
