//! Property-based tests for cursor, cancellation and staging invariants.
//!
//! Run with: `cargo test --test property`

mod alignment;
mod cursor_invariants;
