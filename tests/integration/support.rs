//! Shared fixtures: counter files, driven schedulers and instrumented
//! backends.

use offload_rs::{
    Completion, ErrorCode, InlineBackend, IoBackend, QueueId, ReadOp, Scheduler, SchedulerConfig,
    StatusArray, SubmitError,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Little-endian `u32` counters covering `[offset, offset + len)`.
///
/// `offset` need not be 4-aligned; the byte at position `p` is byte
/// `p % 4` of counter `p / 4`.
pub fn counter_bytes(offset: u64, len: usize) -> Vec<u8> {
    (offset..offset + len as u64)
        .map(|p| ((p / 4) as u32).to_le_bytes()[(p % 4) as usize])
        .collect()
}

/// Temporary file filled with counters. Deleted on drop.
pub struct CounterFile {
    _dir: TempDir,
    pub path: PathBuf,
}

pub fn counter_file(len: u64) -> CounterFile {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("counters.bin");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(&counter_bytes(0, len as usize)).unwrap();
    CounterFile { _dir: dir, path }
}

/// Temporary file with arbitrary contents.
pub fn bytes_file(bytes: &[u8]) -> CounterFile {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("blob.bin");
    std::fs::write(&path, bytes).unwrap();
    CounterFile { _dir: dir, path }
}

pub fn zlib(bytes: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap()
}

/// Route library logs through the test harness. Idempotent.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn driven(config: SchedulerConfig) -> Scheduler {
    init_logging();
    Scheduler::driven(config, Box::new(InlineBackend::new()))
}

pub fn threaded() -> Scheduler {
    init_logging();
    Scheduler::new(SchedulerConfig {
        io_workers: 2,
        ..SchedulerConfig::default()
    })
    .unwrap()
}

/// Poll a status slot until it completes. Panics after ten seconds.
pub fn wait_status(array: &StatusArray, index: u32) -> ErrorCode {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !array.is_complete(index) {
        assert!(Instant::now() < deadline, "status slot {index} never completed");
        thread::sleep(Duration::from_micros(200));
    }
    array.get_result(index)
}

/// Inline backend that logs the queue of every submitted read.
pub struct RecordingBackend {
    inner: InlineBackend,
    log: Arc<Mutex<Vec<QueueId>>>,
}

impl RecordingBackend {
    pub fn with_log() -> (Self, Arc<Mutex<Vec<QueueId>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                inner: InlineBackend::new(),
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl IoBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn submit(&mut self, op: ReadOp) -> Result<(), SubmitError> {
        self.log.lock().unwrap().push(op.token.queue);
        self.inner.submit(op)
    }

    fn poll(&mut self, out: &mut Vec<Completion>) -> usize {
        self.inner.poll(out)
    }

    fn in_flight(&self) -> usize {
        self.inner.in_flight()
    }
}

/// Backend whose reads all complete with `kind`, or which rejects them at
/// submit when `reject` is set.
pub struct FailingBackend {
    kind: io::ErrorKind,
    reject: bool,
    done: Vec<Completion>,
}

impl FailingBackend {
    pub fn completing_with(kind: io::ErrorKind) -> Self {
        Self {
            kind,
            reject: false,
            done: Vec::new(),
        }
    }

    pub fn rejecting(kind: io::ErrorKind) -> Self {
        Self {
            kind,
            reject: true,
            done: Vec::new(),
        }
    }
}

impl IoBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn submit(&mut self, op: ReadOp) -> Result<(), SubmitError> {
        let error = io::Error::new(self.kind, "injected");
        if self.reject {
            return Err(SubmitError { op, error });
        }
        self.done.push(op.complete(Err(error)));
        Ok(())
    }

    fn poll(&mut self, out: &mut Vec<Completion>) -> usize {
        let n = self.done.len();
        out.append(&mut self.done);
        n
    }

    fn in_flight(&self) -> usize {
        self.done.len()
    }
}

/// Status array wrapper that enforces the slot-reuse contract: a slot may
/// be enqueued again only after its previous use was observed complete.
pub struct CheckedStatus {
    array: StatusArray,
    armed: Mutex<Vec<bool>>,
}

impl CheckedStatus {
    pub fn new(len: u32) -> Self {
        Self {
            array: StatusArray::new(len, Some("checked")),
            armed: Mutex::new(vec![false; len as usize]),
        }
    }

    /// Claim `index` for a new status write.
    pub fn arm(&self, index: u32) -> &StatusArray {
        let mut armed = self.armed.lock().unwrap();
        assert!(
            !armed[index as usize],
            "status slot {index} reused before completion was observed"
        );
        armed[index as usize] = true;
        &self.array
    }

    /// Observe the slot; releases it once complete.
    pub fn poll(&self, index: u32) -> Option<ErrorCode> {
        if !self.array.is_complete(index) {
            return None;
        }
        self.armed.lock().unwrap()[index as usize] = false;
        Some(self.array.get_result(index))
    }
}
