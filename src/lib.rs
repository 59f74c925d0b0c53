//! Priority-scheduled bulk reads with staging, completion sinks and inline
//! decompression.
//!
//! ## Scope
//! Callers enqueue read requests (file byte range or in-memory bytes into a
//! caller buffer, optionally zlib-compressed) on prioritized queues. A
//! scheduler issues the reads through an asynchronous backend, widens them
//! to device-aligned ranges through a bounded staging pool when needed,
//! inflates compressed payloads on dedicated loops and reports completion
//! through status slots, fences and events.
//!
//! ## Key invariants
//! - Per-queue completion is FIFO: a sink fires only after every entry
//!   enqueued before it on the same queue is finished, failed or cancelled.
//!   There is no ordering across queues.
//! - Queue cursors satisfy `not_complete <= read <= submitted <= enqueued`
//!   and `enqueued - not_complete <= capacity`.
//! - Staging memory is bounded. Exhaustion is a retry condition, never an
//!   error, and a queue waiting on memory keeps its place in the priority
//!   rotation.
//! - At most `max_in_flight` device reads are outstanding at once.
//!
//! ## Request flow
//! `enqueue (validate) -> submit -> read (direct or staged) -> [inflate] ->
//! copy -> in-order completion walk -> sink`
//!
//! ## Notable entry points
//! - [`Scheduler`] / [`SchedulerConfig`]: owns queues, staging and the loops.
//! - [`Queue`]: enqueue, submit, cancel, query, close.
//! - [`Request`], [`Destination`], [`DestBuffer`], [`PageArray`]: what to
//!   read and where it lands.
//! - [`StatusArray`], [`Fence`], [`Event`]: completion sinks.
//! - [`IoBackend`] and [`Codec`]: pluggable read and inflate stages.

pub mod align;
pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod files;
pub mod queue;
pub mod request;
pub mod scheduler;
pub mod sink;
pub mod staging;

mod sync;

pub use backend::{
    Completion, InlineBackend, IoBackend, QueueId, ReadOp, ReadTarget, SubmitError,
    ThreadPoolBackend, Token,
};
pub use codec::{Codec, CodecError, ZlibCodec};
pub use config::SchedulerConfig;
pub use error::{CreateError, ErrorCode, QueueClosed};
pub use files::{FileHandle, FileId, FileRegistry};
pub use queue::{CursorSnapshot, EntryState, ErrorRecord, FailureDetails, Queue, QueueInfo};
pub use request::{
    Decompression, DestBuffer, Destination, DestinationKind, PageArray, Priority, QueueDesc,
    Request, Source, SourceType,
};
pub use scheduler::{PumpReport, Scheduler};
pub use sink::{Event, EventReset, Fence, StatusArray};
pub use staging::{StagingAllocator, StagingBuffer, StagingStats};
