use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Maps a key onto one of `shards` buckets.
///
/// `DefaultHasher::new()` uses fixed keys, so a given key always lands in the
/// same bucket for the lifetime of the process.
pub(crate) fn shard_index<K: Hash + ?Sized>(key: &K, shards: usize) -> usize {
    debug_assert!(shards > 0);
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}
