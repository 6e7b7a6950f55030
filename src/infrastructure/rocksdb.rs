use crate::domain::dedup::{DedupKey, DedupRecord, EvictionCriteria};
use crate::domain::ports::DedupStorage;
use crate::error::{CoreError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;

/// Column Family for storing dedup records.
pub const CF_DEDUP_RECORDS: &str = "dedup_records";

/// A persistent dedup store backed by RocksDB.
///
/// Keys are `len(identifier_type) | identifier_type | identifier`, so all
/// records of one type share a prefix. Values are JSON encoded records.
///
/// Read-modify-write operations are serialized through `write_lock`; reads go
/// straight to the database. `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the "dedup_records" column family exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_records = ColumnFamilyDescriptor::new(CF_DEDUP_RECORDS, Options::default());
        let db = DB::open_cf_descriptors(&opts, path, vec![cf_records])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn records_cf(&self) -> Result<&ColumnFamily> {
        self.db.cf_handle(CF_DEDUP_RECORDS).ok_or_else(|| {
            CoreError::StoreUnavailable("Dedup records column family not found".to_string())
        })
    }

    fn length_prefix(len: usize) -> Result<[u8; 4]> {
        u32::try_from(len)
            .map(u32::to_be_bytes)
            .map_err(|_| CoreError::InvalidKey(format!("identifier type too long: {len} bytes")))
    }

    fn type_prefix(identifier_type: &str) -> Result<Vec<u8>> {
        let mut prefix = Vec::with_capacity(4 + identifier_type.len());
        prefix.extend_from_slice(&Self::length_prefix(identifier_type.len())?);
        prefix.extend_from_slice(identifier_type.as_bytes());
        Ok(prefix)
    }

    fn encode_key(key: &DedupKey) -> Result<Vec<u8>> {
        let mut encoded = Self::type_prefix(&key.identifier_type)?;
        encoded.extend_from_slice(key.identifier.as_bytes());
        Ok(encoded)
    }

    fn encode_record(record: &DedupRecord) -> Result<Vec<u8>> {
        serde_json::to_vec(record)
            .map_err(|e| CoreError::CorruptRecord(format!("Serialization error: {}", e)))
    }

    fn decode_record(bytes: &[u8]) -> Result<DedupRecord> {
        serde_json::from_slice(bytes)
            .map_err(|e| CoreError::CorruptRecord(format!("Deserialization error: {}", e)))
    }

    fn read(&self, key: &DedupKey) -> Result<Option<DedupRecord>> {
        let cf = self.records_cf()?;
        match self.db.get_pinned_cf(cf, Self::encode_key(key)?)? {
            Some(bytes) => Ok(Some(Self::decode_record(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write(&self, record: &DedupRecord) -> Result<()> {
        let cf = self.records_cf()?;
        self.db
            .put_cf(cf, Self::encode_key(&record.key())?, Self::encode_record(record)?)?;
        Ok(())
    }

    /// Calls `visit` for every stored record whose encoded key starts with `prefix`.
    fn scan<F>(&self, prefix: &[u8], mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], DedupRecord),
    {
        let cf = self.records_cf()?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            visit(&key, Self::decode_record(&value)?);
        }
        Ok(())
    }
}

#[async_trait]
impl DedupStorage for RocksDBStore {
    async fn get(&self, key: &DedupKey) -> Result<Option<DedupRecord>> {
        self.read(key)
    }

    async fn insert_if_absent(&self, record: DedupRecord) -> Result<Option<DedupRecord>> {
        let _guard = self.write_lock.lock();
        if let Some(existing) = self.read(&record.key())? {
            return Ok(Some(existing));
        }
        self.write(&record)?;
        Ok(None)
    }

    async fn update(&self, record: DedupRecord) -> Result<bool> {
        let _guard = self.write_lock.lock();
        if self.read(&record.key())?.is_none() {
            return Ok(false);
        }
        self.write(&record)?;
        Ok(true)
    }

    async fn delete(&self, key: &DedupKey) -> Result<bool> {
        let _guard = self.write_lock.lock();
        if self.read(key)?.is_none() {
            return Ok(false);
        }
        let cf = self.records_cf()?;
        self.db.delete_cf(cf, Self::encode_key(key)?)?;
        Ok(true)
    }

    async fn delete_where(&self, criteria: &EvictionCriteria) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let mut doomed = Vec::new();
        self.scan(&[], |key, record| {
            if criteria.matches(&record) {
                doomed.push(key.to_vec());
            }
        })?;

        let cf = self.records_cf()?;
        let mut batch = WriteBatch::default();
        for key in &doomed {
            batch.delete_cf(cf, key);
        }
        self.db.write(batch)?;
        Ok(doomed.len())
    }

    async fn count(&self) -> Result<usize> {
        let mut total = 0;
        self.scan(&[], |_, _| total += 1)?;
        Ok(total)
    }

    async fn count_by_type(&self, identifier_type: &str) -> Result<usize> {
        let mut total = 0;
        self.scan(&Self::type_prefix(identifier_type)?, |_, _| total += 1)?;
        Ok(total)
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut keys = Vec::new();
        self.scan(&[], |key, _| keys.push(key.to_vec()))?;

        let cf = self.records_cf()?;
        let mut batch = WriteBatch::default();
        for key in &keys {
            batch.delete_cf(cf, key);
        }
        self.db.write(batch)?;
        Ok(())
    }
}
