//! The scheduler: queue factory, staging owner and background loops.
//!
//! # Architecture
//!
//! ```text
//!   caller threads                       scheduler
//!   ──────────────                       ─────────
//!   Queue::enqueue_* ─┐
//!   Queue::submit    ─┼──► QueueCore ◄── submission loop ──► IoBackend
//!   Queue::cancel_*  ─┘     (ring)   ◄── decompression loops ──► Codec
//!                              │
//!                              └──► CompletionSink (status / fence / event)
//! ```
//!
//! - One submission loop owns the [`IoBackend`]. Each pass drains
//!   completions, then issues reads under the `max_in_flight` budget.
//! - `decompression_threads` loops inflate entries in `ReadyDecompress`.
//! - Both loop kinds pick queues with the priority-threshold selector and
//!   park for at most one heartbeat when idle. Backend completions and
//!   `Queue::submit` unpark them early.
//!
//! # Driven mode
//!
//! [`Scheduler::driven`] spawns no threads. The caller advances the engine
//! with [`Scheduler::pump_submission`] and [`Scheduler::pump_decompression`].
//! A blocked enqueue or `close` pumps on the caller's thread, so a single
//! thread can run the whole engine deterministically.
//!
//! # Shutdown
//!
//! Dropping the scheduler stops both loop kinds. The submission loop first
//! collects every read still owned by the backend so their buffers return to
//! the staging budget. Queues still alive afterwards reject new work.

mod decompression;
mod selection;
mod submission;

pub use submission::PumpReport;

use crate::backend::{IoBackend, QueueId, ThreadPoolBackend};
use crate::config::{SchedulerConfig, MAX_CAPACITY, MIN_CAPACITY};
use crate::error::CreateError;
use crate::files::{FileHandle, FileRegistry};
use crate::queue::ring::QueueCore;
use crate::queue::Queue;
use crate::request::{truncate_name, QueueDesc, SourceType};
use crate::staging::{StagingAllocator, StagingBuffer, StagingStats};
use crate::sync::{lock, try_lock};
use crossbeam_utils::sync::{Parker, Unparker};
use selection::PrioritySelector;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use submission::SubmissionPump;

pub(crate) struct QueueTable {
    pub(crate) queues: Vec<Arc<QueueCore>>,
    next_id: u32,
}

/// State shared by the scheduler, its loops and every queue handle.
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    pub(crate) staging: StagingAllocator,
    pub(crate) files: FileRegistry,
    pub(crate) table: Mutex<QueueTable>,
    pub(crate) decompress_selector: Mutex<PrioritySelector>,
    submission: Option<Unparker>,
    decompressors: Vec<Unparker>,
    shutdown: AtomicBool,
    /// Present only in driven mode.
    driven: Mutex<Option<SubmissionPump>>,
}

impl Shared {
    fn new(
        config: SchedulerConfig,
        submission: Option<Unparker>,
        decompressors: Vec<Unparker>,
        driven: Option<SubmissionPump>,
    ) -> Self {
        Self {
            staging: StagingAllocator::new(config.staging_bytes),
            files: FileRegistry::new(config.max_open_files),
            table: Mutex::new(QueueTable {
                queues: Vec::new(),
                next_id: 0,
            }),
            decompress_selector: Mutex::new(PrioritySelector::new()),
            submission,
            decompressors,
            shutdown: AtomicBool::new(false),
            driven: Mutex::new(driven),
            config,
        }
    }

    /// Replace `out` with the live queues.
    fn snapshot_into(&self, out: &mut Vec<Arc<QueueCore>>) {
        out.clear();
        out.extend(lock(&self.table).queues.iter().cloned());
    }

    #[inline]
    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn wake_submission(&self) {
        if let Some(unparker) = &self.submission {
            unparker.unpark();
        }
    }

    pub(crate) fn wake_decompression(&self) {
        for unparker in &self.decompressors {
            unparker.unpark();
        }
    }

    /// Progress hook for a caller blocked on a queue.
    ///
    /// In driven mode this runs one submission and one decompression pass
    /// unless another thread is already pumping. Returns false once the
    /// scheduler has shut down.
    pub(crate) fn drive(&self) -> bool {
        if self.is_shut_down() {
            return false;
        }
        if let Some(mut guard) = try_lock(&self.driven) {
            if let Some(pump) = guard.as_mut() {
                let mut queues = Vec::new();
                self.snapshot_into(&mut queues);
                pump.pump(&queues);
                drop(guard);
                decompression::run_pass(self);
            }
        }
        true
    }

    /// Drop a closed queue from the service table.
    pub(crate) fn unregister(&self, id: QueueId) {
        let mut table = lock(&self.table);
        table.queues.retain(|q| q.id() != id);
    }
}

/// Owner of queues, staging memory, the file registry and the service loops.
///
/// Construct one per process (or per test) and pass it by reference; queue
/// handles keep the shared state alive on their own.
pub struct Scheduler {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Threaded scheduler over a [`ThreadPoolBackend`] with
    /// `config.io_workers` readers.
    ///
    /// # Panics
    /// Panics if `config` fails [`SchedulerConfig::validate`].
    pub fn new(config: SchedulerConfig) -> io::Result<Self> {
        let backend = ThreadPoolBackend::new(config.io_workers)?;
        Self::with_backend(config, Box::new(backend))
    }

    /// Threaded scheduler over a caller-supplied backend.
    ///
    /// # Panics
    /// Panics if `config` fails [`SchedulerConfig::validate`].
    pub fn with_backend(config: SchedulerConfig, mut backend: Box<dyn IoBackend>) -> io::Result<Self> {
        config.validate();

        let submission_parker = Parker::new();
        let submission_unparker = submission_parker.unparker().clone();
        let mut parkers = Vec::with_capacity(config.decompression_threads);
        let mut unparkers = Vec::with_capacity(config.decompression_threads);
        for _ in 0..config.decompression_threads {
            let p = Parker::new();
            unparkers.push(p.unparker().clone());
            parkers.push(p);
        }

        let waker = submission_unparker.clone();
        backend.set_completion_waker(Arc::new(move || waker.unpark()));
        let pump = SubmissionPump::new(backend, config.max_in_flight);
        log::info!("scheduler starting: {config:?} backend={}", pump.backend_name());

        let shared = Arc::new(Shared::new(
            config,
            Some(submission_unparker),
            unparkers,
            None,
        ));
        // On a spawn failure the partially built scheduler drops and joins
        // whatever did start.
        let mut scheduler = Self {
            shared,
            threads: Vec::new(),
        };

        let shared = Arc::clone(&scheduler.shared);
        scheduler.threads.push(
            thread::Builder::new()
                .name("offload-submit".into())
                .spawn(move || submission_loop(&shared, pump, submission_parker))?,
        );
        for (n, parker) in parkers.into_iter().enumerate() {
            let shared = Arc::clone(&scheduler.shared);
            scheduler.threads.push(
                thread::Builder::new()
                    .name(format!("offload-inflate-{n}"))
                    .spawn(move || decompression_loop(&shared, parker))?,
            );
        }
        Ok(scheduler)
    }

    /// Scheduler without background threads; see the module docs.
    ///
    /// # Panics
    /// Panics if `config` fails [`SchedulerConfig::validate`].
    pub fn driven(config: SchedulerConfig, backend: Box<dyn IoBackend>) -> Self {
        config.validate();
        let pump = SubmissionPump::new(backend, config.max_in_flight);
        log::info!("driven scheduler: {config:?} backend={}", pump.backend_name());
        Self {
            shared: Arc::new(Shared::new(config, None, Vec::new(), Some(pump))),
            threads: Vec::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// True when no background threads run.
    pub fn is_driven(&self) -> bool {
        self.threads.is_empty()
    }

    /// Create and register a queue.
    pub fn create_queue(&self, desc: QueueDesc) -> Result<Queue, CreateError> {
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&desc.capacity) {
            return Err(CreateError::InvalidCapacity {
                capacity: desc.capacity,
            });
        }
        if desc.source_type == SourceType::Memory {
            return Err(CreateError::InvalidSourceType);
        }
        let desc = QueueDesc {
            name: desc.name.map(truncate_name),
            ..desc
        };

        let mut table = lock(&self.shared.table);
        let max = self.shared.config.max_queues;
        if table.queues.len() >= max {
            return Err(CreateError::TooManyQueues { max });
        }
        let id = QueueId(table.next_id);
        table.next_id = table.next_id.wrapping_add(1);
        let core = Arc::new(QueueCore::new(id, desc, self.shared.staging.clone()));
        table.queues.push(Arc::clone(&core));
        drop(table);

        log::debug!(
            "created queue {:?} {:?} priority={:?} capacity={}",
            id,
            core.desc().name,
            core.desc().priority,
            core.capacity()
        );
        Ok(Queue::new(core, Arc::clone(&self.shared)))
    }

    /// Open (or share) a file through the registry.
    pub fn open_file(&self, path: impl AsRef<Path>) -> Result<FileHandle, CreateError> {
        self.shared.files.open(path)
    }

    #[inline]
    pub fn files(&self) -> &FileRegistry {
        &self.shared.files
    }

    /// Allocate from the shared staging budget. Never blocks.
    pub fn allocate_staging(&self, len: usize) -> Option<StagingBuffer> {
        self.shared.staging.allocate(len)
    }

    /// Resize the staging budget. Buffers already handed out stay valid.
    ///
    /// # Panics
    /// Panics if `bytes` is 0.
    pub fn set_staging_buffer_size(&self, bytes: u64) {
        self.shared.staging.set_capacity(bytes);
        self.shared.wake_submission();
    }

    pub fn staging_stats(&self) -> StagingStats {
        self.shared.staging.stats()
    }

    pub fn queue_count(&self) -> usize {
        lock(&self.shared.table).queues.len()
    }

    /// Run one submission pass on the calling thread.
    ///
    /// Returns an empty report for a threaded scheduler, whose loop owns the
    /// backend.
    pub fn pump_submission(&self) -> PumpReport {
        let mut guard = lock(&self.shared.driven);
        let Some(pump) = guard.as_mut() else {
            return PumpReport::default();
        };
        let mut queues = Vec::new();
        self.shared.snapshot_into(&mut queues);
        pump.pump(&queues)
    }

    /// Run one decompression pass on the calling thread. Returns the number
    /// of entries inflated.
    pub fn pump_decompression(&self) -> usize {
        decompression::run_pass(&self.shared)
    }

    /// Pump both loops until a pass makes no progress. Driven mode only.
    pub fn run_until_idle(&self) {
        loop {
            let report = self.pump_submission();
            let inflated = self.pump_decompression();
            if !report.made_progress() && inflated == 0 {
                break;
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("queues", &self.queue_count())
            .field("threads", &self.threads.len())
            .field("staging", &self.shared.staging)
            .finish()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.wake_submission();
        self.shared.wake_decompression();
        for th in self.threads.drain(..) {
            let name = th.thread().name().unwrap_or("<unnamed>").to_owned();
            if th.join().is_err() {
                log::error!("scheduler thread {name} panicked");
            }
        }
        log::debug!("scheduler stopped");
    }
}

fn submission_loop(shared: &Shared, mut pump: SubmissionPump, parker: Parker) {
    let heartbeat = shared.config.submission_heartbeat;
    let mut queues = Vec::new();
    while !shared.is_shut_down() {
        shared.snapshot_into(&mut queues);
        let report = pump.pump(&queues);
        if report.decompress_ready {
            shared.wake_decompression();
        }
        if !report.made_progress() {
            parker.park_timeout(heartbeat);
        }
    }

    // Reads still owned by the backend hold staging buffers.
    let pending = pump.in_flight();
    if pending > 0 {
        log::debug!("submission loop draining {pending} reads");
    }
    while pump.in_flight() > 0 {
        shared.snapshot_into(&mut queues);
        if pump.complete(&queues) == 0 {
            parker.park_timeout(heartbeat);
        }
    }
}

fn decompression_loop(shared: &Shared, parker: Parker) {
    let heartbeat = shared.config.decompression_heartbeat;
    while !shared.is_shut_down() {
        if decompression::run_pass(shared) > 0 {
            // Inflating frees staging a waiting read may need.
            shared.wake_submission();
        } else {
            parker.park_timeout(heartbeat);
        }
    }
}
