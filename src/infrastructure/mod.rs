//! Adapters for the domain ports: storage backends, clocks and flush sinks.

pub mod clock;
pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod sink;
