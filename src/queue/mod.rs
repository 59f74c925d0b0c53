//! Request queues.
//!
//! A [`Queue`] is the caller-facing handle; the ring buffer, cursors and
//! entry state machine live in `ring`. The scheduler services rings through
//! the crate-internal `QueueCore` API.

pub(crate) mod entry;
mod error_record;
mod handle;
pub(crate) mod ring;

pub use entry::EntryState;
pub use error_record::{ErrorRecord, FailureDetails};
pub use handle::Queue;
pub use ring::{CursorSnapshot, QueueInfo};
