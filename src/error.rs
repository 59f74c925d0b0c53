//! Result and error types.
//!
//! Two families, split by when they surface:
//!
//! - [`ErrorCode`] is the per-request outcome. It is latched into status
//!   slots and the queue error record and never travels through `Result`.
//! - [`CreateError`] covers synchronous failures when creating queues or
//!   opening files.
//!
//! Running out of staging memory is neither: it is a retry condition the
//! submission loop handles internally.

use std::fmt;
use std::io;

/// Outcome of a single request, as reported by status slots and the error
/// record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// All covered requests finished.
    Ok,
    /// The status slot has not completed yet.
    Pending,
    /// Offset and length exceed the file size.
    EndOfFile,
    /// The request's file has already been closed.
    FileNotOpen,
    /// The request needs more staging memory than the allocator can ever hold.
    RequestTooLarge,
    /// A field that must be zero or in range was not.
    ReservedFields,
    /// Destination size does not fit the source size or decompression mode.
    InvalidDestinationSize,
    /// Intermediate size does not fit the destination.
    InvalidIntermediateSize,
    /// The queue was closed.
    QueueClosed,
    /// The codec rejected the compressed stream.
    Decompression,
    /// The codec does not implement the requested format.
    NotImplemented,
    /// The device read failed.
    Io(io::ErrorKind),
}

impl ErrorCode {
    /// Numeric code compatible with the storage-offload HRESULT space.
    pub fn hresult(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::Pending => 0x8000_000A,
            Self::EndOfFile => 0x8924_0007,
            Self::FileNotOpen => 0x8924_000B,
            Self::RequestTooLarge => 0x8924_0008,
            Self::ReservedFields => 0x8924_000C,
            Self::InvalidDestinationSize => 0x8924_000F,
            Self::QueueClosed => 0x8924_0010,
            Self::InvalidIntermediateSize => 0x8924_001C,
            Self::Decompression => 0x8000_4005,
            Self::NotImplemented => 0x8000_4001,
            Self::Io(_) => 0x8007_001F,
        }
    }

    #[inline]
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// True for everything except `Ok` and `Pending`.
    #[inline]
    pub fn is_failure(self) -> bool {
        !matches!(self, Self::Ok | Self::Pending)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Pending => write!(f, "pending"),
            Self::EndOfFile => write!(f, "offset and length exceed the file size"),
            Self::FileNotOpen => write!(f, "file is not open"),
            Self::RequestTooLarge => write!(f, "request exceeds the staging capacity"),
            Self::ReservedFields => write!(f, "reserved field is not zero"),
            Self::InvalidDestinationSize => write!(f, "invalid destination size"),
            Self::InvalidIntermediateSize => write!(f, "invalid intermediate size"),
            Self::QueueClosed => write!(f, "queue is closed"),
            Self::Decompression => write!(f, "decompression failed"),
            Self::NotImplemented => write!(f, "codec path not implemented"),
            Self::Io(kind) => write!(f, "read failed: {kind}"),
        }
    }
}

impl From<&io::Error> for ErrorCode {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self::EndOfFile,
            kind => Self::Io(kind),
        }
    }
}

/// Creation-time failures for queues and files.
#[derive(Debug)]
#[non_exhaustive]
pub enum CreateError {
    /// Capacity outside `[MIN_CAPACITY, MAX_CAPACITY]`.
    InvalidCapacity { capacity: u16 },
    /// The scheduler already holds `max` queues.
    TooManyQueues { max: usize },
    /// Queues must be file-sourced.
    InvalidSourceType,
    /// Raw priority value outside the known tiers.
    InvalidPriority { raw: i8 },
    /// The registry already holds `max` distinct files.
    TooManyFiles { max: usize },
    /// Opening or inspecting the file failed.
    Open(io::Error),
}

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCapacity { capacity } => {
                write!(f, "invalid queue capacity: {capacity:#x}")
            }
            Self::TooManyQueues { max } => write!(f, "too many queues (max: {max})"),
            Self::InvalidSourceType => write!(f, "queues must use the file source type"),
            Self::InvalidPriority { raw } => write!(f, "invalid queue priority: {raw}"),
            Self::TooManyFiles { max } => write!(f, "too many open files (max: {max})"),
            Self::Open(err) => write!(f, "open failed: {err}"),
        }
    }
}

impl std::error::Error for CreateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for CreateError {
    fn from(err: io::Error) -> Self {
        Self::Open(err)
    }
}

/// Returned by enqueue operations on a closed queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueClosed;

impl fmt::Display for QueueClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ErrorCode::QueueClosed)
    }
}

impl std::error::Error for QueueClosed {}
