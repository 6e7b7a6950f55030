use chrono::Utc;
use paybatch::domain::dedup::{DedupKey, DedupRecord};
use paybatch::domain::ports::DedupStorageBox;
use paybatch::infrastructure::in_memory::InMemoryDedupStorage;
use std::sync::Arc;

#[tokio::test]
async fn test_storage_as_trait_object() {
    let storage: DedupStorageBox = Box::new(InMemoryDedupStorage::new());
    let key = DedupKey::new("INSTR-1", "InstrId");
    let record = DedupRecord::new(&key, "M1", Utc::now(), None);

    // Verify Send + Sync by spawning tasks
    let handle = tokio::spawn(async move {
        assert!(storage.insert_if_absent(record).await.unwrap().is_none());
        storage.get(&key).await.unwrap().unwrap()
    });

    let retrieved = handle.await.unwrap();
    assert_eq!(retrieved.origin_message_id, "M1");
}

#[tokio::test]
async fn test_shared_storage_across_tasks() {
    let storage: Arc<DedupStorageBox> = Arc::new(Box::new(InMemoryDedupStorage::new()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            let key = DedupKey::new("INSTR-SHARED", "InstrId");
            let record = DedupRecord::new(&key, format!("M{i}"), Utc::now(), None);
            storage.insert_if_absent(record).await.unwrap().is_none()
        }));
    }

    let mut inserted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);
    assert_eq!(storage.count().await.unwrap(), 1);
}
