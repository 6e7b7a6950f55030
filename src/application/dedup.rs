use crate::domain::dedup::{DedupKey, DedupRecord, DedupStatus, EvictionCriteria};
use crate::domain::ports::{ClockRef, DedupStorageBox};
use crate::error::Result;
use crate::sharding::shard_index;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Result of a check-and-mark call.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub is_duplicate: bool,
    /// The stored record after this call's bookkeeping.
    pub record: DedupRecord,
}

/// Answers "has this business fact been seen before?" atomically per key.
///
/// Calls on the same key are serialized through one of `lock_stripes` async
/// mutexes picked by key hash; calls on keys in different stripes never wait
/// for each other. The storage backend is consulted only while the stripe is held.
pub struct DeduplicationService {
    storage: DedupStorageBox,
    clock: ClockRef,
    stripes: Vec<Mutex<()>>,
}

impl DeduplicationService {
    pub const DEFAULT_LOCK_STRIPES: usize = 64;

    pub fn new(storage: DedupStorageBox, clock: ClockRef) -> Self {
        Self::with_lock_stripes(storage, clock, Self::DEFAULT_LOCK_STRIPES)
    }

    /// A stripe count of zero is bumped to one.
    pub fn with_lock_stripes(storage: DedupStorageBox, clock: ClockRef, stripes: usize) -> Self {
        Self {
            storage,
            clock,
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, key: &DedupKey) -> &Mutex<()> {
        &self.stripes[shard_index(key, self.stripes.len())]
    }

    /// Records `key` as seen, or bumps the bookkeeping of the live record.
    ///
    /// Exactly one of any set of racing callers on a fresh key gets
    /// `is_duplicate == false`. An expired record counts as absent and is replaced.
    pub async fn check_and_mark(
        &self,
        key: &DedupKey,
        message_id: &str,
        ttl: Option<Duration>,
    ) -> Result<CheckOutcome> {
        key.validate()?;
        let _guard = self.stripe(key).lock().await;
        let now = self.clock.now();
        let fresh = DedupRecord::new(key, message_id, now, ttl);

        match self.storage.get(key).await? {
            Some(mut existing) if !existing.is_expired_at(now) => {
                existing.record_access(now);
                if self.storage.update(existing.clone()).await? {
                    debug!(%key, message_id, access_count = existing.access_count, "duplicate");
                    return Ok(CheckOutcome {
                        is_duplicate: true,
                        record: existing,
                    });
                }
                // Evicted between our read and write; this call now comes after the eviction.
            }
            Some(expired) => {
                debug!(%key, origin = %expired.origin_message_id, "replacing expired record");
                if self.storage.update(fresh.clone()).await? {
                    return Ok(CheckOutcome {
                        is_duplicate: false,
                        record: fresh,
                    });
                }
            }
            None => {}
        }

        match self.storage.insert_if_absent(fresh.clone()).await? {
            None => {
                debug!(%key, message_id, "first sighting");
                Ok(CheckOutcome {
                    is_duplicate: false,
                    record: fresh,
                })
            }
            // Another writer sharing the backend got there first.
            Some(mut existing) => {
                existing.record_access(now);
                self.storage.update(existing.clone()).await?;
                Ok(CheckOutcome {
                    is_duplicate: true,
                    record: existing,
                })
            }
        }
    }

    /// Pure read: no bookkeeping. An expired record is reported as absent and
    /// purged, unless a concurrent call already replaced it.
    pub async fn lookup(&self, key: &DedupKey) -> Result<Option<DedupRecord>> {
        key.validate()?;
        let now = self.clock.now();
        match self.storage.get(key).await? {
            Some(record) if record.is_expired_at(now) => {
                let _guard = self.stripe(key).lock().await;
                if let Some(current) = self.storage.get(key).await?
                    && current.is_expired_at(now)
                {
                    self.storage.delete(key).await?;
                }
                Ok(None)
            }
            found => Ok(found),
        }
    }

    /// Sets the status of a live record, e.g. to `Failed` after a downstream error.
    pub async fn mark_status(
        &self,
        key: &DedupKey,
        status: DedupStatus,
    ) -> Result<Option<DedupRecord>> {
        key.validate()?;
        let _guard = self.stripe(key).lock().await;
        let now = self.clock.now();
        match self.storage.get(key).await? {
            Some(mut record) if !record.is_expired_at(now) => {
                record.status = status;
                let updated = self.storage.update(record.clone()).await?;
                Ok(updated.then_some(record))
            }
            _ => Ok(None),
        }
    }

    /// Removes records first seen before `cutoff` and records past their expiry.
    pub async fn evict_expired(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let criteria = EvictionCriteria {
            first_seen_before: cutoff,
            now: self.clock.now(),
        };
        let removed = self.storage.delete_where(&criteria).await?;
        debug!(removed, %cutoff, "evicted dedup records");
        Ok(removed)
    }

    pub async fn count(&self) -> Result<usize> {
        self.storage.count().await
    }

    pub async fn count_by_type(&self, identifier_type: &str) -> Result<usize> {
        self.storage.count_by_type(identifier_type).await
    }

    /// Drops every record. Meant for tests and resets.
    pub async fn clear(&self) -> Result<()> {
        self.storage.clear().await
    }
}
