//! Completion sinks.
//!
//! A sink is the caller-visible end of an in-order completion walk: when the
//! queue's not-complete cursor reaches a sink entry, every entry enqueued
//! before it is terminal and the sink fires. Status slots additionally carry
//! the first error seen since the previous status write; fences and events
//! carry no error detail.

mod event;
mod fence;
mod status;

pub use event::{Event, EventReset};
pub use fence::Fence;
pub use status::StatusArray;

use crate::error::ErrorCode;

/// A completion target enqueued behind requests.
#[derive(Clone, Debug)]
pub enum CompletionSink {
    /// Write completion and the latched first error into a status slot.
    Status { array: StatusArray, index: u32 },
    /// Raise a fence to `value`.
    Fence { fence: Fence, value: u64 },
    /// Set an event.
    Event(Event),
}

impl CompletionSink {
    /// Called when the sink is enqueued.
    pub(crate) fn arm(&self) {
        if let Self::Status { array, index } = self {
            array.mark_incomplete(*index);
        }
    }

    /// Fire the sink. `first_error` is the error latched since the last
    /// status write, if any.
    pub(crate) fn resolve(&self, first_error: Option<ErrorCode>) {
        match self {
            Self::Status { array, index } => {
                array.complete(*index, first_error.unwrap_or(ErrorCode::Ok))
            }
            Self::Fence { fence, value } => fence.signal(*value),
            Self::Event(event) => event.set(),
        }
    }

    /// True for status writes, which consume the latched error.
    #[inline]
    pub(crate) fn consumes_error(&self) -> bool {
        matches!(self, Self::Status { .. })
    }
}
