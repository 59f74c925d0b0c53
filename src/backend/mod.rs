//! Asynchronous read backends.
//!
//! A backend accepts [`ReadOp`]s from the submission loop and hands back
//! [`Completion`]s tagged with the op's correlation [`Token`]. Buffers travel
//! with the op: the staging buffer (or direct destination) is moved into the
//! backend on submit and moved back out in the completion, so nothing is
//! shared while the read is in flight.
//!
//! The submission loop calls [`IoBackend::poll`] and must never block, so
//! `submit` and `poll` are both non-blocking.
//!
//! Backends:
//! - [`ThreadPoolBackend`]: positional reads on a small worker pool.
//! - [`InlineBackend`]: reads synchronously on submit and reports the
//!   completion on the next poll. Deterministic; used in driven mode and
//!   tests.

mod inline;
mod thread_pool;

pub use inline::InlineBackend;
pub use thread_pool::ThreadPoolBackend;

use crate::files::OpenFile;
use crate::request::DestBuffer;
use crate::staging::StagingBuffer;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Queue identifier assigned by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(pub u32);

/// Correlates a completion with the queue entry that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Token {
    pub queue: QueueId,
    /// Absolute cursor position of the entry (not the slot index).
    pub position: u64,
}

/// Where the bytes of a read land.
#[derive(Debug)]
pub enum ReadTarget {
    Staging(StagingBuffer),
    /// Block-aligned read straight into the caller's buffer.
    Direct(DestBuffer),
}

/// One device read.
#[derive(Debug)]
pub struct ReadOp {
    pub token: Token,
    pub file: Arc<OpenFile>,
    /// Aligned file offset.
    pub offset: u64,
    /// Aligned length.
    pub len: usize,
    pub target: ReadTarget,
}

impl ReadOp {
    /// Perform the read synchronously on the current thread.
    pub fn execute(&mut self) -> io::Result<usize> {
        match &mut self.target {
            ReadTarget::Staging(buf) => {
                let len = self.len.min(buf.len());
                self.file.read_at(&mut buf[..len], self.offset)
            }
            ReadTarget::Direct(dest) => {
                let mut bytes = dest.lock();
                let len = self.len.min(bytes.len());
                self.file.read_at(&mut bytes[..len], self.offset)
            }
        }
    }

    /// Turn the finished op into its completion.
    pub fn complete(self, result: io::Result<usize>) -> Completion {
        Completion {
            token: self.token,
            result,
            target: self.target,
        }
    }
}

/// Result of one read, delivered through [`IoBackend::poll`].
#[derive(Debug)]
pub struct Completion {
    pub token: Token,
    /// Bytes read, or the I/O error.
    pub result: io::Result<usize>,
    pub target: ReadTarget,
}

/// Synchronous submit failure. The op is handed back so its buffers are
/// released by the caller.
#[derive(Debug)]
pub struct SubmitError {
    pub op: ReadOp,
    pub error: io::Error,
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read submit failed: {}", self.error)
    }
}

impl std::error::Error for SubmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Callback a backend invokes when a completion becomes pollable.
pub type CompletionWaker = Arc<dyn Fn() + Send + Sync>;

/// Asynchronous positional-read backend.
pub trait IoBackend: Send {
    fn name(&self) -> &'static str;

    /// Queue `op`. Must not block.
    fn submit(&mut self, op: ReadOp) -> Result<(), SubmitError>;

    /// Move finished reads into `out`. Must not block. Returns how many
    /// were appended.
    fn poll(&mut self, out: &mut Vec<Completion>) -> usize;

    /// Reads submitted but not yet returned by `poll`.
    fn in_flight(&self) -> usize;

    /// Register a callback for "a completion is ready".
    fn set_completion_waker(&mut self, _waker: CompletionWaker) {}
}
