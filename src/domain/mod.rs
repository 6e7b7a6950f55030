//! Domain types and the ports the core consumes or exposes.

pub mod batch;
pub mod dedup;
pub mod message;
pub mod ports;
