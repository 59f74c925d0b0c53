//! Integration tests for the offload engine.
//!
//! Run with: `cargo test --test integration`

mod support;

mod cancellation;
mod concurrency;
mod decompression;
mod fairness;
mod ordering;
