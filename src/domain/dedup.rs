use crate::error::{CoreError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifies a business fact (e.g. an ISO-20022 `InstrId`) within its type namespace.
///
/// Keys are case-sensitive and stored exactly as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    pub identifier: String,
    pub identifier_type: String,
}

impl DedupKey {
    pub fn new(identifier: impl Into<String>, identifier_type: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            identifier_type: identifier_type.into(),
        }
    }

    /// Rejects keys with an empty identifier or identifier type.
    pub fn validate(&self) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(CoreError::InvalidKey("identifier must not be empty".to_string()));
        }
        if self.identifier_type.is_empty() {
            return Err(CoreError::InvalidKey(
                "identifier type must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.identifier_type, self.identifier)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DedupStatus {
    #[default]
    Processed,
    Failed,
    Pending,
    Duplicate,
}

/// The stored trace of a business fact having been seen.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct DedupRecord {
    pub identifier: String,
    pub identifier_type: String,
    /// Id of the message that first produced this record.
    pub origin_message_id: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Number of check-and-mark calls that hit this record, the creating call included.
    pub access_count: u64,
    /// `None` means the record never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub status: DedupStatus,
}

impl DedupRecord {
    pub fn new(
        key: &DedupKey,
        origin_message_id: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            identifier: key.identifier.clone(),
            identifier_type: key.identifier_type.clone(),
            origin_message_id: origin_message_id.into(),
            first_seen_at: now,
            last_accessed_at: now,
            access_count: 1,
            // A ttl too large to represent is treated as "never expires".
            expires_at: ttl
                .and_then(|ttl| TimeDelta::from_std(ttl).ok())
                .and_then(|ttl| now.checked_add_signed(ttl)),
            status: DedupStatus::Processed,
        }
    }

    pub fn key(&self) -> DedupKey {
        DedupKey::new(self.identifier.clone(), self.identifier_type.clone())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Bookkeeping for a lookup that found this record live.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }
}

/// Selects the records removed by an eviction sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionCriteria {
    /// Records first seen strictly before this instant are evicted.
    pub first_seen_before: DateTime<Utc>,
    /// Records whose expiry is at or before this instant are evicted.
    pub now: DateTime<Utc>,
}

impl EvictionCriteria {
    pub fn matches(&self, record: &DedupRecord) -> bool {
        record.first_seen_at < self.first_seen_before || record.is_expired_at(self.now)
    }
}
