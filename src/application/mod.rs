//! Application layer containing the core orchestration.
//!
//! `DeduplicationService` answers "seen before?" per business identifier,
//! `AggregationEngine` accumulates items per correlation key and releases each
//! batch exactly once, and `PaymentPipeline` chains the two.

pub mod aggregator;
pub mod dedup;
pub mod pipeline;
pub mod strategy;
