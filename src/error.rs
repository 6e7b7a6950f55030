use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// The dedup backing store could not be reached. Never treated as "not a duplicate".
    #[error("Dedup store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Invalid completion policy: {0}")]
    InvalidPolicy(String),
    #[error("Aggregation engine has been shut down")]
    EngineShutDown,
    #[error("Corrupt dedup record: {0}")]
    CorruptRecord(String),
    #[error("Configuration error: {0}")]
    ConfigError(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for CoreError {
    fn from(err: rocksdb::Error) -> Self {
        CoreError::StoreUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
