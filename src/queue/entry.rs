//! Queue entries and their state machine.
//!
//! ```text
//!  Blank ─► Pending ─► Submitted ─► Reading ─┬─► Finished ─► Blank
//!             │            │           │     └─► ReadyDecompress ─► Decompressing ─► Finished
//!             │            │           └─► Error (only from a read completion)
//!             ├────────────┴─► Cancelled
//!             ├─► ReadyDecompress   (memory-sourced requests)
//!             └─► Error             (validation, submit failure, codec failure)
//! ```
//!
//! Sink entries go `Blank ─► Pending ─► Submitted ─► Blank`; they are terminal
//! as soon as the not-complete cursor reaches them.

use crate::error::ErrorCode;
use crate::request::Request;
use crate::sink::CompletionSink;
use crate::staging::StagingBuffer;

/// Per-entry state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryState {
    Blank,
    Pending,
    Submitted,
    Reading,
    ReadyDecompress,
    Decompressing,
    Finished,
    Error,
    Cancelled,
}

impl EntryState {
    /// Finished, errored or cancelled.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Cancelled)
    }

    /// Legal single-step transitions.
    ///
    /// `Reading -> Error` is legal only through a read completion; nothing
    /// else may touch a request while the backend owns its buffers.
    pub fn can_transition_to(self, next: EntryState) -> bool {
        use EntryState::*;
        match next {
            Blank => self.is_terminal() || self == Submitted,
            Pending => self == Blank,
            Submitted => self == Pending,
            Reading => self == Submitted,
            ReadyDecompress => matches!(self, Pending | Reading | Decompressing),
            Decompressing => self == ReadyDecompress,
            Finished => matches!(self, Reading | Decompressing),
            Error => !matches!(self, Blank | Cancelled | Error | Finished),
            Cancelled => matches!(self, Pending | Submitted),
        }
    }
}

/// Payload of an entry.
#[derive(Debug)]
pub(crate) enum EntryKind {
    Empty,
    Request(Box<Request>),
    Sink(CompletionSink),
}

/// One slot of a queue's circular array.
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) kind: EntryKind,
    pub(crate) state: EntryState,
    /// Read landing buffer when the destination cannot be read into directly.
    pub(crate) staging: Option<StagingBuffer>,
    /// Inflate target ahead of the final copy.
    pub(crate) intermediate: Option<StagingBuffer>,
    /// Offset of the caller's first byte inside `staging`.
    pub(crate) head: u32,
    /// Failure code while the entry sits in `Error`.
    pub(crate) error: Option<ErrorCode>,
}

impl Entry {
    pub(crate) fn blank() -> Self {
        Self {
            kind: EntryKind::Empty,
            state: EntryState::Blank,
            staging: None,
            intermediate: None,
            head: 0,
            error: None,
        }
    }

    #[inline]
    pub(crate) fn transition(&mut self, next: EntryState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal entry transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    #[inline]
    pub(crate) fn request(&self) -> Option<&Request> {
        match &self.kind {
            EntryKind::Request(req) => Some(req),
            _ => None,
        }
    }

    /// Recycle the slot. Dropping staging handles returns their budget.
    pub(crate) fn reset(&mut self) {
        self.transition(EntryState::Blank);
        self.kind = EntryKind::Empty;
        self.staging = None;
        self.intermediate = None;
        self.head = 0;
        self.error = None;
    }
}
