//! Engine configuration and limits.
//!
//! Every limit here is a resource the scheduler arbitrates: how many device
//! reads may be outstanding, how much staging memory may be held, how many
//! queues and files may exist at once.

use crate::codec::{Codec, ZlibCodec};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Device block size. Reads are widened to multiples of this.
pub const BLOCK_ALIGN: u64 = 4096;

/// Smallest legal queue capacity.
pub const MIN_CAPACITY: u16 = 0x80;

/// Largest legal queue capacity.
pub const MAX_CAPACITY: u16 = 0x2000;

/// Longest debug name kept for queues, sinks and requests, in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// Granule of a physical-page destination.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Default cap on outstanding device reads across all queues.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Default cap on live queues.
pub const DEFAULT_MAX_QUEUES: usize = 100;

/// Default cap on distinct open files.
pub const DEFAULT_MAX_OPEN_FILES: usize = 5000;

/// Default staging budget (32 MiB).
pub const DEFAULT_STAGING_BYTES: u64 = 32 * 1024 * 1024;

/// Default background heartbeat for both loop kinds.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(2);

const _: () = {
    assert!(BLOCK_ALIGN.is_power_of_two());
    assert!(MIN_CAPACITY <= MAX_CAPACITY);
    assert!(PAGE_SIZE as u64 % BLOCK_ALIGN == 0);
};

/// Scheduler configuration.
///
/// # Sizing Guidelines
///
/// | Field | Consequence of raising it |
/// |-------|---------------------------|
/// | `max_in_flight` | More reads queued in the backend; more staging held |
/// | `staging_bytes` | Fewer `WaitingOnMemory` stalls on unaligned traffic |
/// | `decompression_threads` | More parallel inflates; more lock traffic |
/// | `io_workers` | More concurrent positional reads in the thread-pool backend |
#[derive(Clone)]
pub struct SchedulerConfig {
    /// Cap on outstanding device reads across all queues.
    pub max_in_flight: usize,
    /// Cap on live queues.
    pub max_queues: usize,
    /// Cap on distinct open files.
    pub max_open_files: usize,
    /// Initial staging budget in bytes.
    pub staging_bytes: u64,
    /// Number of decompression loops.
    pub decompression_threads: usize,
    /// Worker threads of the thread-pool read backend.
    pub io_workers: usize,
    /// Maximum park time of the submission loop between wakeups.
    pub submission_heartbeat: Duration,
    /// Maximum park time of a decompression loop between wakeups.
    pub decompression_heartbeat: Duration,
    /// Spin rounds a full-queue enqueue performs before parking.
    pub enqueue_spin_rounds: u32,
    /// Decompression codec shared by all loops.
    pub codec: Arc<dyn Codec>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_queues: DEFAULT_MAX_QUEUES,
            max_open_files: DEFAULT_MAX_OPEN_FILES,
            staging_bytes: DEFAULT_STAGING_BYTES,
            decompression_threads: 1,
            io_workers: 4,
            submission_heartbeat: DEFAULT_HEARTBEAT,
            decompression_heartbeat: DEFAULT_HEARTBEAT,
            enqueue_spin_rounds: 64,
            codec: Arc::new(ZlibCodec),
        }
    }
}

impl fmt::Debug for SchedulerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerConfig")
            .field("max_in_flight", &self.max_in_flight)
            .field("max_queues", &self.max_queues)
            .field("max_open_files", &self.max_open_files)
            .field("staging_bytes", &self.staging_bytes)
            .field("decompression_threads", &self.decompression_threads)
            .field("io_workers", &self.io_workers)
            .field("submission_heartbeat", &self.submission_heartbeat)
            .field("decompression_heartbeat", &self.decompression_heartbeat)
            .field("enqueue_spin_rounds", &self.enqueue_spin_rounds)
            .field("codec", &self.codec.name())
            .finish()
    }
}

impl SchedulerConfig {
    /// Validate the configuration.
    ///
    /// # Panics
    ///
    /// Panics on a zero in-flight budget, zero queues, zero files, zero
    /// staging, zero decompression threads, zero I/O workers or a zero
    /// heartbeat.
    pub fn validate(&self) {
        assert!(self.max_in_flight > 0, "max_in_flight must be > 0");
        assert!(self.max_queues > 0, "max_queues must be > 0");
        assert!(self.max_open_files > 0, "max_open_files must be > 0");
        assert!(self.staging_bytes > 0, "staging_bytes must be > 0");
        assert!(
            self.decompression_threads > 0,
            "decompression_threads must be > 0"
        );
        assert!(self.io_workers > 0, "io_workers must be > 0");
        assert!(
            !self.submission_heartbeat.is_zero() && !self.decompression_heartbeat.is_zero(),
            "heartbeats must be non-zero"
        );
    }
}
