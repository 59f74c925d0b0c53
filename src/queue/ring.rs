//! Circular request queue.
//!
//! # Cursors
//!
//! Four monotonically increasing positions partition the ring:
//!
//! ```text
//!   not_complete      read         submitted      enqueued
//!        │  in flight  │  submitted   │   pending    │   free ...
//!   ─────┴─────────────┴──────────────┴──────────────┴──────────
//! ```
//!
//! - `not_complete <= read <= submitted <= enqueued`
//! - `enqueued - not_complete <= capacity`
//!
//! A position maps to slot `position % capacity`. Entries are recycled only
//! by the in-order completion walk, which is also the only place sinks fire,
//! so completions are FIFO per queue.
//!
//! # Locking
//!
//! All entry and cursor mutation happens under the queue mutex. The cursors
//! are mirrored into atomics so the scheduler can decide which queue to
//! visit without taking every queue lock. Inflation runs with the lock
//! released; the entry is claimed first by moving it to `Decompressing`.

use super::entry::{Entry, EntryKind, EntryState};
use super::error_record::ErrorRecord;
use crate::align::AlignedRange;
use crate::backend::{Completion, IoBackend, QueueId, ReadOp, ReadTarget, Token};
use crate::codec::Codec;
use crate::config::PAGE_SIZE;
use crate::error::{ErrorCode, QueueClosed};
use crate::files::OpenFile;
use crate::request::{Decompression, DestBuffer, Destination, QueueDesc, Request, Source};
use crate::sink::{CompletionSink, Event, EventReset};
use crate::staging::{StagingAllocator, StagingBuffer};
use crate::sync::{lock, wait_timeout};
use crossbeam_utils::Backoff;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Snapshot of the four cursors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CursorSnapshot {
    pub not_complete: u64,
    pub read: u64,
    pub submitted: u64,
    pub enqueued: u64,
}

impl CursorSnapshot {
    /// `not_complete <= read <= submitted <= enqueued` and the ring is not
    /// overfull.
    pub fn is_consistent(&self, capacity: u64) -> bool {
        self.not_complete <= self.read
            && self.read <= self.submitted
            && self.submitted <= self.enqueued
            && self.enqueued - self.not_complete <= capacity
    }
}

/// Result of [`QueueCore::query`].
#[derive(Clone, Debug)]
pub struct QueueInfo {
    pub desc: QueueDesc,
    pub empty_slots: u32,
    pub requests_until_auto_submit: u32,
}

/// Outcome of one attempt to issue a read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A read was handed to the backend.
    Submitted,
    /// No submitted request left between the read and submitted cursors.
    NothingToSubmit,
    /// Staging memory is exhausted; the read cursor did not move.
    WaitingOnMemory,
    /// The request failed synchronously and was marked errored.
    Failed,
}

/// Outcome of one attempt to inflate a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecompressOutcome {
    Decompressed,
    NothingToDecompress,
    WaitingOnMemory,
}

pub(crate) struct QueueState {
    entries: Box<[Entry]>,
    cursors: CursorSnapshot,
    first_error_since_status: Option<ErrorCode>,
    record: ErrorRecord,
    closed: bool,
}

impl QueueState {
    #[inline]
    fn slot(&self, position: u64) -> usize {
        (position % self.entries.len() as u64) as usize
    }

    #[inline]
    fn entry_mut(&mut self, position: u64) -> &mut Entry {
        let slot = self.slot(position);
        &mut self.entries[slot]
    }

    #[inline]
    fn entry(&self, position: u64) -> &Entry {
        &self.entries[self.slot(position)]
    }
}

/// Shared queue state serviced by the scheduler loops.
pub(crate) struct QueueCore {
    id: QueueId,
    desc: QueueDesc,
    capacity: u64,
    staging: StagingAllocator,
    state: Mutex<QueueState>,
    slot_freed: Condvar,
    error_event: Event,
    submitted: AtomicU64,
    read: AtomicU64,
    ready_decompress: AtomicUsize,
    closed: AtomicBool,
}

/// Everything needed to issue one read, copied out of a `Submitted` entry.
struct ReadPlan {
    file: Arc<OpenFile>,
    range: AlignedRange,
    /// Set when the read can land in the caller's buffer without staging.
    direct_dest: Option<DestBuffer>,
    intermediate_size: usize,
}

impl ReadPlan {
    /// `None` for sinks, non-submitted entries and memory sources.
    fn for_entry(entry: &Entry) -> Option<Self> {
        if entry.state != EntryState::Submitted {
            return None;
        }
        let req = entry.request()?;
        let Source::File { file, offset } = &req.source else {
            return None;
        };
        let range = AlignedRange::for_range(*offset, req.source_size as u64);
        let direct = range.is_exact(req.source_size as u64) && !req.is_compressed();
        let direct_dest = match &req.destination {
            Destination::Buffer(buf) if direct => Some(buf.clone()),
            _ => None,
        };
        Some(Self {
            file: Arc::clone(file),
            range,
            direct_dest,
            intermediate_size: req.intermediate_size() as usize,
        })
    }
}

/// Claimed decompression work, processed with the queue lock released.
struct DecompressJob {
    position: u64,
    input: JobInput,
    intermediate: Option<StagingBuffer>,
    destination: Destination,
    dest_size: usize,
    format: Decompression,
}

enum JobInput {
    Staged { buf: StagingBuffer, head: usize, len: usize },
    Memory(Arc<[u8]>, usize),
}

impl JobInput {
    fn bytes(&self) -> &[u8] {
        match self {
            Self::Staged { buf, head, len } => &buf[*head..*head + *len],
            Self::Memory(bytes, len) => &bytes[..*len],
        }
    }
}

impl QueueCore {
    pub(crate) fn new(id: QueueId, desc: QueueDesc, staging: StagingAllocator) -> Self {
        let capacity = desc.capacity as u64;
        let entries = (0..capacity).map(|_| Entry::blank()).collect();
        Self {
            id,
            desc,
            capacity,
            staging,
            state: Mutex::new(QueueState {
                entries,
                cursors: CursorSnapshot::default(),
                first_error_since_status: None,
                record: ErrorRecord::default(),
                closed: false,
            }),
            slot_freed: Condvar::new(),
            error_event: Event::new(EventReset::Auto),
            submitted: AtomicU64::new(0),
            read: AtomicU64::new(0),
            ready_decompress: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> QueueId {
        self.id
    }

    #[inline]
    pub(crate) fn desc(&self) -> &QueueDesc {
        &self.desc
    }

    #[inline]
    pub(crate) fn capacity(&self) -> u64 {
        self.capacity
    }

    pub(crate) fn error_event(&self) -> &Event {
        &self.error_event
    }

    fn label(&self) -> &str {
        self.desc.name.as_deref().unwrap_or("<unnamed>")
    }

    /// Submitted entries the read cursor has not passed yet.
    #[inline]
    pub(crate) fn has_submittable(&self) -> bool {
        self.read.load(Ordering::Acquire) < self.submitted.load(Ordering::Acquire)
    }

    /// At least one entry is waiting in `ReadyDecompress`.
    #[inline]
    pub(crate) fn has_decompressible(&self) -> bool {
        self.ready_decompress.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn cursors(&self) -> CursorSnapshot {
        lock(&self.state).cursors
    }

    /// State of the entry at `position`, if it is still live.
    pub(crate) fn entry_state(&self, position: u64) -> Option<EntryState> {
        let st = lock(&self.state);
        let c = st.cursors;
        (position >= c.not_complete && position < c.enqueued).then(|| st.entry(position).state)
    }

    fn publish(&self, st: &QueueState) {
        self.submitted.store(st.cursors.submitted, Ordering::Release);
        self.read.store(st.cursors.read, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Enqueue side
    // ------------------------------------------------------------------

    /// Wait until a slot is free.
    ///
    /// Spins with backoff for `spin_rounds`, then parks on the slot-freed
    /// condition for at most `heartbeat` per round. `drive` runs between
    /// rounds; it lets a caller-driven scheduler make progress and returns
    /// false when waiting can no longer succeed.
    fn wait_for_slot(
        &self,
        spin_rounds: u32,
        heartbeat: Duration,
        drive: &mut dyn FnMut() -> bool,
    ) -> Result<MutexGuard<'_, QueueState>, QueueClosed> {
        let backoff = Backoff::new();
        let mut rounds = 0u32;
        loop {
            let st = lock(&self.state);
            if st.closed {
                return Err(QueueClosed);
            }
            if st.cursors.enqueued - st.cursors.not_complete < self.capacity {
                return Ok(st);
            }
            if rounds < spin_rounds {
                drop(st);
                backoff.snooze();
            } else {
                let st = wait_timeout(&self.slot_freed, st, heartbeat);
                drop(st);
            }
            rounds = rounds.saturating_add(1);
            if !drive() {
                return Err(QueueClosed);
            }
        }
    }

    /// Enqueue a request. Returns true when the pending backlog reached the
    /// auto-submit threshold.
    pub(crate) fn enqueue_request(
        &self,
        req: Request,
        spin_rounds: u32,
        heartbeat: Duration,
        drive: &mut dyn FnMut() -> bool,
    ) -> Result<bool, QueueClosed> {
        let verdict = validate(&req, &self.staging);
        let mut st = self.wait_for_slot(spin_rounds, heartbeat, drive)?;
        let position = st.cursors.enqueued;
        let entry = st.entry_mut(position);
        entry.kind = EntryKind::Request(Box::new(req));
        entry.transition(EntryState::Pending);
        if let Err(code) = verdict {
            self.fail(&mut st, position, code);
        }
        st.cursors.enqueued += 1;
        Ok(self.auto_submit_due(&st))
    }

    /// Enqueue a completion sink behind everything enqueued so far.
    pub(crate) fn enqueue_sink(
        &self,
        sink: CompletionSink,
        spin_rounds: u32,
        heartbeat: Duration,
        drive: &mut dyn FnMut() -> bool,
    ) -> Result<bool, QueueClosed> {
        let mut st = self.wait_for_slot(spin_rounds, heartbeat, drive)?;
        let position = st.cursors.enqueued;
        sink.arm();
        let entry = st.entry_mut(position);
        entry.kind = EntryKind::Sink(sink);
        entry.transition(EntryState::Pending);
        st.cursors.enqueued += 1;
        Ok(self.auto_submit_due(&st))
    }

    #[inline]
    fn auto_submit_due(&self, st: &QueueState) -> bool {
        st.cursors.enqueued - st.cursors.submitted >= self.capacity / 2
    }

    /// Move every pending entry to `Submitted` (or `ReadyDecompress` for
    /// memory-sourced requests) and run the completion walk.
    pub(crate) fn submit(&self) {
        let mut st = lock(&self.state);
        if st.closed {
            return;
        }
        let (from, to) = (st.cursors.submitted, st.cursors.enqueued);
        for position in from..to {
            let entry = st.entry_mut(position);
            if entry.state != EntryState::Pending {
                continue;
            }
            let memory = entry.request().is_some_and(Request::is_memory);
            if memory {
                entry.transition(EntryState::ReadyDecompress);
                self.ready_decompress.fetch_add(1, Ordering::AcqRel);
            } else {
                entry.transition(EntryState::Submitted);
            }
        }
        st.cursors.submitted = to;
        self.publish(&st);
        self.signal_completions_in_order(&mut st);
    }

    /// Cancel pending or submitted requests whose `tag & mask == value`.
    ///
    /// Returns how many were cancelled. Requests already reading are left
    /// alone and complete normally.
    pub(crate) fn cancel_requests_with_tag(&self, mask: u64, value: u64) -> usize {
        let mut st = lock(&self.state);
        if st.closed {
            return 0;
        }
        let mut cancelled = 0;
        let (from, to) = (st.cursors.not_complete, st.cursors.enqueued);
        for position in from..to {
            let entry = st.entry_mut(position);
            let matches = entry
                .request()
                .is_some_and(|r| r.cancellation_tag & mask == value);
            if matches && matches!(entry.state, EntryState::Pending | EntryState::Submitted) {
                entry.transition(EntryState::Cancelled);
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            log::debug!("queue {}: cancelled {cancelled} requests", self.label());
            self.signal_completions_in_order(&mut st);
        }
        cancelled
    }

    // ------------------------------------------------------------------
    // Submission loop side
    // ------------------------------------------------------------------

    /// Issue the next submitted read, if any.
    pub(crate) fn submit_next_request(&self, backend: &mut dyn IoBackend) -> SubmitOutcome {
        let mut st = lock(&self.state);
        while st.cursors.read < st.cursors.submitted {
            let position = st.cursors.read;
            let Some(ReadPlan {
                file,
                range,
                direct_dest,
                intermediate_size,
            }) = ReadPlan::for_entry(st.entry(position))
            else {
                st.cursors.read += 1;
                continue;
            };

            let mut intermediate = None;
            let target = match direct_dest {
                Some(dest) => ReadTarget::Direct(dest),
                None => {
                    let total = StagingAllocator::charge_for(range.len)
                        + if intermediate_size > 0 {
                            StagingAllocator::charge_for(intermediate_size as u64)
                        } else {
                            0
                        };
                    if total > self.staging.capacity() {
                        st.cursors.read += 1;
                        self.fail(&mut st, position, ErrorCode::RequestTooLarge);
                        self.publish(&st);
                        self.signal_completions_in_order(&mut st);
                        return SubmitOutcome::Failed;
                    }
                    let Some(buf) = self.staging.allocate(range.len as usize) else {
                        return SubmitOutcome::WaitingOnMemory;
                    };
                    if intermediate_size > 0 {
                        match self.staging.allocate(intermediate_size) {
                            Some(second) => intermediate = Some(second),
                            None => {
                                self.staging.free(buf);
                                return SubmitOutcome::WaitingOnMemory;
                            }
                        }
                    }
                    ReadTarget::Staging(buf)
                }
            };

            let op = ReadOp {
                token: Token {
                    queue: self.id,
                    position,
                },
                file,
                offset: range.offset,
                len: range.len as usize,
                target,
            };
            st.cursors.read += 1;
            let outcome = match backend.submit(op) {
                Ok(()) => {
                    let entry = st.entry_mut(position);
                    entry.head = range.head as u32;
                    entry.intermediate = intermediate;
                    entry.transition(EntryState::Reading);
                    SubmitOutcome::Submitted
                }
                Err(err) => {
                    log::warn!(
                        "queue {}: {} rejected read: {}",
                        self.label(),
                        backend.name(),
                        err.error
                    );
                    drop(err.op);
                    drop(intermediate);
                    self.fail(&mut st, position, ErrorCode::from(&err.error));
                    self.signal_completions_in_order(&mut st);
                    SubmitOutcome::Failed
                }
            };
            self.publish(&st);
            return outcome;
        }
        self.publish(&st);
        SubmitOutcome::NothingToSubmit
    }

    /// Fold a backend completion into its entry.
    pub(crate) fn on_read_complete(&self, completion: Completion) {
        let Completion {
            token,
            result,
            target,
        } = completion;
        debug_assert_eq!(token.queue, self.id);
        let mut st = lock(&self.state);
        let position = token.position;
        debug_assert!(position >= st.cursors.not_complete && position < st.cursors.read);
        debug_assert_eq!(st.entry(position).state, EntryState::Reading);

        let outcome = match result {
            Err(err) => {
                log::warn!("queue {}: read failed: {err}", self.label());
                Err(ErrorCode::from(&err))
            }
            Ok(n) => match st.entry(position).request() {
                Some(req) => {
                    let head = st.entry(position).head as usize;
                    if n < head + req.source_size as usize {
                        Err(ErrorCode::EndOfFile)
                    } else {
                        Ok(req.is_compressed())
                    }
                }
                None => Err(ErrorCode::ReservedFields),
            },
        };

        match (outcome, target) {
            (Err(code), _target) => self.fail(&mut st, position, code),
            (Ok(true), ReadTarget::Staging(buf)) => {
                let entry = st.entry_mut(position);
                entry.staging = Some(buf);
                entry.transition(EntryState::ReadyDecompress);
                self.ready_decompress.fetch_add(1, Ordering::AcqRel);
            }
            (Ok(_), ReadTarget::Staging(buf)) => {
                let entry = st.entry_mut(position);
                let head = entry.head as usize;
                if let Some(req) = entry.request() {
                    let len = req.dest_size as usize;
                    req.destination.write(&buf[head..head + len]);
                }
                self.staging.free(buf);
                entry.transition(EntryState::Finished);
            }
            (Ok(_), ReadTarget::Direct(_)) => {
                st.entry_mut(position).transition(EntryState::Finished)
            }
        }
        self.signal_completions_in_order(&mut st);
    }

    // ------------------------------------------------------------------
    // Decompression loop side
    // ------------------------------------------------------------------

    /// Claim and inflate the oldest `ReadyDecompress` entry.
    pub(crate) fn decompress_next_request(&self, codec: &dyn Codec) -> DecompressOutcome {
        let mut job = match self.claim_decompression() {
            Some(job) => job,
            None => return DecompressOutcome::NothingToDecompress,
        };

        let intermediate_size = match job.format {
            Decompression::Zlib { intermediate_size } => intermediate_size as usize,
            Decompression::None => 0,
        };
        if intermediate_size > 0 && job.intermediate.is_none() {
            match self.staging.allocate(intermediate_size) {
                Some(buf) => job.intermediate = Some(buf),
                None => {
                    self.unclaim(job);
                    return DecompressOutcome::WaitingOnMemory;
                }
            }
        }

        let result = run_job(&mut job, codec);

        let mut st = lock(&self.state);
        let DecompressJob {
            position,
            input,
            intermediate,
            ..
        } = job;
        drop(input);
        drop(intermediate);
        match result {
            Ok(()) => st.entry_mut(position).transition(EntryState::Finished),
            Err(code) => {
                log::warn!("queue {}: decompression failed: {code}", self.label());
                self.fail(&mut st, position, code);
            }
        }
        self.signal_completions_in_order(&mut st);
        DecompressOutcome::Decompressed
    }

    fn claim_decompression(&self) -> Option<DecompressJob> {
        let mut st = lock(&self.state);
        let (from, to) = (st.cursors.not_complete, st.cursors.submitted);
        let position = (from..to).find(|&p| st.entry(p).state == EntryState::ReadyDecompress)?;
        self.ready_decompress.fetch_sub(1, Ordering::AcqRel);

        let entry = st.entry_mut(position);
        entry.transition(EntryState::Decompressing);
        let head = entry.head as usize;
        let staged = entry.staging.take();
        let intermediate = entry.intermediate.take();
        let req = entry.request()?;
        let input = match (&req.source, staged) {
            (_, Some(buf)) => JobInput::Staged {
                buf,
                head,
                len: req.source_size as usize,
            },
            (Source::Memory(bytes), None) => {
                JobInput::Memory(Arc::clone(bytes), req.source_size as usize)
            }
            (Source::File { .. }, None) => {
                debug_assert!(false, "file request ready to decompress without staging");
                return None;
            }
        };
        Some(DecompressJob {
            position,
            input,
            intermediate,
            destination: req.destination.clone(),
            dest_size: req.dest_size as usize,
            format: req.decompression,
        })
    }

    /// Return a claimed job to `ReadyDecompress` after a staging failure.
    fn unclaim(&self, job: DecompressJob) {
        let mut st = lock(&self.state);
        let entry = st.entry_mut(job.position);
        if let JobInput::Staged { buf, .. } = job.input {
            entry.staging = Some(buf);
        }
        entry.intermediate = job.intermediate;
        entry.transition(EntryState::ReadyDecompress);
        self.ready_decompress.fetch_add(1, Ordering::AcqRel);
    }

    // ------------------------------------------------------------------
    // Completion walk and errors
    // ------------------------------------------------------------------

    /// Resolve terminal entries from the not-complete cursor forward and
    /// recycle their slots. Stops at the first entry still in progress.
    fn signal_completions_in_order(&self, st: &mut QueueState) {
        let mut advanced = false;
        while st.cursors.not_complete < st.cursors.submitted {
            let position = st.cursors.not_complete;
            let done = {
                let entry = st.entry(position);
                match &entry.kind {
                    EntryKind::Sink(_) => true,
                    EntryKind::Request(_) => entry.state.is_terminal(),
                    EntryKind::Empty => {
                        debug_assert!(false, "empty entry inside the live window");
                        false
                    }
                }
            };
            if !done {
                break;
            }

            // The latch follows queue order, so a status only sees failures
            // of the entries it covers.
            let (consumes, failed) = {
                let entry = st.entry(position);
                match &entry.kind {
                    EntryKind::Sink(sink) => (sink.consumes_error(), None),
                    _ => (false, entry.error),
                }
            };
            if st.first_error_since_status.is_none() {
                st.first_error_since_status = failed;
            }
            let first_error = if consumes {
                st.first_error_since_status.take()
            } else {
                None
            };
            let entry = st.entry_mut(position);
            if let EntryKind::Sink(sink) = &entry.kind {
                sink.resolve(first_error);
            }
            entry.reset();
            st.cursors.not_complete += 1;
            advanced = true;
        }
        if advanced {
            // Cancelled and rejected entries complete ahead of the read cursor.
            st.cursors.read = st.cursors.read.max(st.cursors.not_complete);
            self.publish(st);
            self.slot_freed.notify_all();
        }
    }

    fn fail(&self, st: &mut QueueState, position: u64, code: ErrorCode) {
        let slot = st.slot(position);
        let entry = &mut st.entries[slot];
        entry.transition(EntryState::Error);
        entry.staging = None;
        entry.intermediate = None;
        entry.error = Some(code);
        if let EntryKind::Request(req) = &entry.kind {
            log::warn!(
                "queue {}: request {} failed: {code}",
                self.label(),
                req.name.as_deref().unwrap_or("<unnamed>")
            );
            st.record.record(code, req);
        }
        self.error_event.set();
    }

    /// Take the error record, leaving an empty one behind.
    pub(crate) fn retrieve_error_record(&self) -> ErrorRecord {
        std::mem::take(&mut lock(&self.state).record)
    }

    pub(crate) fn query(&self) -> QueueInfo {
        let st = lock(&self.state);
        let c = st.cursors;
        QueueInfo {
            desc: self.desc.clone(),
            empty_slots: (self.capacity - (c.enqueued - c.not_complete)) as u32,
            requests_until_auto_submit: (self.capacity / 2)
                .saturating_sub(c.enqueued - c.submitted) as u32,
        }
    }

    /// Submit, wait until every slot is recycled, then refuse further work.
    ///
    /// `drive` runs between waits; returning false abandons the drain (the
    /// queue is still closed).
    pub(crate) fn close(&self, heartbeat: Duration, drive: &mut dyn FnMut() -> bool) {
        self.submit();
        loop {
            let st = lock(&self.state);
            if st.closed || st.cursors.not_complete == st.cursors.enqueued {
                break;
            }
            let st = wait_timeout(&self.slot_freed, st, heartbeat);
            drop(st);
            if !drive() {
                log::warn!("queue {}: closed before draining", self.label());
                break;
            }
        }
        let mut st = lock(&self.state);
        if !st.closed {
            st.closed = true;
            self.closed.store(true, Ordering::Release);
            log::debug!("queue {} ({:?}) closed", self.label(), self.id);
        }
        drop(st);
        self.slot_freed.notify_all();
    }
}

/// Synchronous checks run at enqueue time.
fn validate(req: &Request, staging: &StagingAllocator) -> Result<(), ErrorCode> {
    if req.source_size == 0 || req.dest_size == 0 {
        return Err(ErrorCode::InvalidDestinationSize);
    }

    match &req.source {
        Source::File { file, offset } => {
            if file.is_closed() {
                return Err(ErrorCode::FileNotOpen);
            }
            let end = offset
                .checked_add(req.source_size as u64)
                .ok_or(ErrorCode::EndOfFile)?;
            if *offset >= file.size() || end > file.size() {
                return Err(ErrorCode::EndOfFile);
            }
        }
        Source::Memory(bytes) => check_memory_source(req.source_size, bytes.len())?,
    }

    if let Destination::Pages { offset, .. } = &req.destination {
        if *offset as usize >= PAGE_SIZE {
            return Err(ErrorCode::ReservedFields);
        }
    }
    if req.dest_size as usize > req.destination.capacity() {
        return Err(ErrorCode::InvalidDestinationSize);
    }

    match req.decompression {
        Decompression::None => {
            if req.dest_size != req.source_size {
                return Err(ErrorCode::InvalidDestinationSize);
            }
        }
        Decompression::Zlib { intermediate_size } => {
            if intermediate_size != 0 && intermediate_size < req.dest_size {
                return Err(ErrorCode::InvalidIntermediateSize);
            }
            if intermediate_size == 0 && matches!(req.destination, Destination::Pages { .. }) {
                return Err(ErrorCode::InvalidIntermediateSize);
            }
        }
    }

    let mut charge = 0u64;
    if let Source::File { offset, .. } = &req.source {
        let range = AlignedRange::for_range(*offset, req.source_size as u64);
        let direct = range.is_exact(req.source_size as u64)
            && !req.is_compressed()
            && matches!(req.destination, Destination::Buffer(_));
        if !direct {
            charge += StagingAllocator::charge_for(range.len);
        }
    }
    if req.intermediate_size() > 0 {
        charge += StagingAllocator::charge_for(req.intermediate_size() as u64);
    }
    if charge > staging.capacity() {
        return Err(ErrorCode::RequestTooLarge);
    }
    Ok(())
}

/// A memory source must cover `source_size` and be addressable by a `u32` size.
fn check_memory_source(source_size: u32, len: usize) -> Result<(), ErrorCode> {
    if u32::try_from(len).is_err() {
        return Err(ErrorCode::RequestTooLarge);
    }
    if source_size as usize > len {
        return Err(ErrorCode::EndOfFile);
    }
    Ok(())
}

/// Inflate (or copy) a claimed job into its destination.
fn run_job(job: &mut DecompressJob, codec: &dyn Codec) -> Result<(), ErrorCode> {
    let src = job.input.bytes();
    match job.format {
        Decompression::None => {
            job.destination.write(&src[..job.dest_size]);
            Ok(())
        }
        format @ Decompression::Zlib { .. } => {
            let produced = match (&mut job.intermediate, &job.destination) {
                (Some(inter), dest) => {
                    let n = codec.inflate(format, &mut inter[..], src)?;
                    if n == job.dest_size {
                        dest.write(&inter[..n]);
                    }
                    n
                }
                (None, Destination::Buffer(dest)) => {
                    let mut bytes = dest.lock();
                    codec.inflate(format, &mut bytes[..job.dest_size], src)?
                }
                (None, Destination::Pages { .. }) => {
                    return Err(ErrorCode::InvalidIntermediateSize);
                }
            };
            if produced != job.dest_size {
                return Err(ErrorCode::Decompression);
            }
            Ok(())
        }
    }
}
