use super::entry::EntryState;
use super::error_record::ErrorRecord;
use super::ring::{CursorSnapshot, QueueCore, QueueInfo};
use crate::backend::QueueId;
use crate::error::QueueClosed;
use crate::request::{QueueDesc, Request};
use crate::scheduler::Shared;
use crate::sink::{CompletionSink, Event, Fence, StatusArray};
use std::fmt;
use std::sync::Arc;

/// Caller handle to one queue.
///
/// Every method may be called from any thread. Dropping the handle closes
/// the queue (waiting for outstanding work) and removes it from the
/// scheduler.
pub struct Queue {
    core: Arc<QueueCore>,
    shared: Arc<Shared>,
}

impl Queue {
    pub(crate) fn new(core: Arc<QueueCore>, shared: Arc<Shared>) -> Self {
        Self { core, shared }
    }

    #[inline]
    pub fn id(&self) -> QueueId {
        self.core.id()
    }

    #[inline]
    pub fn desc(&self) -> &QueueDesc {
        self.core.desc()
    }

    pub fn name(&self) -> Option<&str> {
        self.core.desc().name.as_deref()
    }

    /// Enqueue a read.
    ///
    /// Blocks while the queue is full. Validation failures do not return an
    /// error here: the entry completes as failed and the next status write
    /// reports it.
    pub fn enqueue_request(&self, req: Request) -> Result<(), QueueClosed> {
        let due = self.core.enqueue_request(
            req,
            self.shared.config.enqueue_spin_rounds,
            self.shared.config.submission_heartbeat,
            &mut || self.shared.drive(),
        )?;
        if due {
            self.submit();
        }
        Ok(())
    }

    /// Enqueue a write of completion status into `array[index]`.
    ///
    /// The slot reads as incomplete from this call until every entry
    /// enqueued before it is terminal. A slot must not be enqueued again
    /// before its previous use was observed complete.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn enqueue_status(&self, array: &StatusArray, index: u32) -> Result<(), QueueClosed> {
        debug_assert!(
            array.is_complete(index),
            "status slot {index} re-enqueued before completing"
        );
        self.enqueue_sink(CompletionSink::Status {
            array: array.clone(),
            index,
        })
    }

    /// Enqueue a signal of `fence` to `value`.
    pub fn enqueue_signal(&self, fence: &Fence, value: u64) -> Result<(), QueueClosed> {
        self.enqueue_sink(CompletionSink::Fence {
            fence: fence.clone(),
            value,
        })
    }

    /// Enqueue a set of `event`.
    pub fn enqueue_event(&self, event: &Event) -> Result<(), QueueClosed> {
        self.enqueue_sink(CompletionSink::Event(event.clone()))
    }

    fn enqueue_sink(&self, sink: CompletionSink) -> Result<(), QueueClosed> {
        let due = self.core.enqueue_sink(
            sink,
            self.shared.config.enqueue_spin_rounds,
            self.shared.config.submission_heartbeat,
            &mut || self.shared.drive(),
        )?;
        if due {
            self.submit();
        }
        Ok(())
    }

    /// Hand everything enqueued so far to the scheduler.
    pub fn submit(&self) {
        self.core.submit();
        self.shared.wake_submission();
        if self.core.has_decompressible() {
            self.shared.wake_decompression();
        }
    }

    /// Cancel requests not yet handed to the backend whose
    /// `cancellation_tag & mask == value`. Returns how many were cancelled.
    pub fn cancel_requests_with_tag(&self, mask: u64, value: u64) -> usize {
        self.core.cancel_requests_with_tag(mask, value)
    }

    /// Take the failure count and first failure, resetting both.
    pub fn retrieve_error_record(&self) -> ErrorRecord {
        self.core.retrieve_error_record()
    }

    pub fn query(&self) -> QueueInfo {
        self.core.query()
    }

    /// Auto-reset event set on every request failure.
    pub fn error_event(&self) -> &Event {
        self.core.error_event()
    }

    pub fn cursors(&self) -> CursorSnapshot {
        self.core.cursors()
    }

    /// State of the entry at absolute cursor `position`, or `None` once the
    /// slot has been recycled (or was never filled).
    pub fn entry_state(&self, position: u64) -> Option<EntryState> {
        self.core.entry_state(position)
    }

    /// Submit outstanding work, wait for it to finish and refuse further
    /// enqueues. Idempotent.
    pub fn close(&self) {
        self.core
            .close(self.shared.config.submission_heartbeat, &mut || {
                self.shared.wake_submission();
                self.shared.drive()
            });
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.id())
            .field("desc", self.desc())
            .field("cursors", &self.cursors())
            .finish()
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        self.close();
        self.shared.unregister(self.core.id());
    }
}
