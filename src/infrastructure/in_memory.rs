use crate::domain::dedup::{DedupKey, DedupRecord, EvictionCriteria};
use crate::domain::ports::DedupStorage;
use crate::error::Result;
use crate::sharding::shard_index;
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;

type Shard = RwLock<HashMap<DedupKey, DedupRecord>>;

/// A thread-safe, process-lifetime store for dedup records.
///
/// Records are spread over independently locked shards so writers on
/// different keys rarely contend. `Clone` shares the underlying shards.
#[derive(Clone)]
pub struct InMemoryDedupStorage {
    shards: Arc<Vec<Shard>>,
}

impl InMemoryDedupStorage {
    pub const DEFAULT_SHARDS: usize = 16;

    /// Creates a new, empty store with the default shard count.
    pub fn new() -> Self {
        Self::with_shards(Self::DEFAULT_SHARDS)
    }

    /// Creates a new, empty store. A shard count of zero is bumped to one.
    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            shards: Arc::new(shards),
        }
    }

    fn shard(&self, key: &DedupKey) -> &Shard {
        &self.shards[shard_index(key, self.shards.len())]
    }
}

impl Default for InMemoryDedupStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DedupStorage for InMemoryDedupStorage {
    async fn get(&self, key: &DedupKey) -> Result<Option<DedupRecord>> {
        let records = self.shard(key).read().await;
        Ok(records.get(key).cloned())
    }

    async fn insert_if_absent(&self, record: DedupRecord) -> Result<Option<DedupRecord>> {
        let key = record.key();
        let mut records = self.shard(&key).write().await;
        match records.entry(key) {
            Entry::Occupied(existing) => Ok(Some(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(None)
            }
        }
    }

    async fn update(&self, record: DedupRecord) -> Result<bool> {
        let key = record.key();
        let mut records = self.shard(&key).write().await;
        match records.get_mut(&key) {
            Some(slot) => {
                *slot = record;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &DedupKey) -> Result<bool> {
        let mut records = self.shard(key).write().await;
        Ok(records.remove(key).is_some())
    }

    async fn delete_where(&self, criteria: &EvictionCriteria) -> Result<usize> {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut records = shard.write().await;
            let before = records.len();
            records.retain(|_, record| !criteria.matches(record));
            removed += before - records.len();
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        let mut total = 0;
        for shard in self.shards.iter() {
            total += shard.read().await.len();
        }
        Ok(total)
    }

    async fn count_by_type(&self, identifier_type: &str) -> Result<usize> {
        let mut total = 0;
        for shard in self.shards.iter() {
            total += shard
                .read()
                .await
                .keys()
                .filter(|key| key.identifier_type == identifier_type)
                .count();
        }
        Ok(total)
    }

    async fn clear(&self) -> Result<()> {
        for shard in self.shards.iter() {
            shard.write().await.clear();
        }
        Ok(())
    }
}
