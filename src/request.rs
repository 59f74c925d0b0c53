//! Request and queue descriptors.
//!
//! A [`Request`] says "read `source_size` bytes from a source into a
//! destination, optionally inflating them". Destinations are shared buffers
//! the engine writes into while the request is in flight; the caller reads
//! them back once a completion sink covering the request has fired.

use crate::config::{MAX_NAME_LEN, PAGE_SIZE};
use crate::error::CreateError;
use crate::files::{FileHandle, OpenFile};
use crate::sync::lock;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

// ============================================================================
// Queue descriptor
// ============================================================================

/// Queue service tier. Lower tiers get a guaranteed slice of service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Normal,
    High,
    Realtime,
}

impl Priority {
    /// Tiers in scan order.
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Realtime,
    ];

    /// Position in [`Priority::ALL`].
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Convert a raw tier value (`-1` = Low through `2` = Realtime).
    pub fn from_raw(raw: i8) -> Result<Self, CreateError> {
        match raw {
            -1 => Ok(Self::Low),
            0 => Ok(Self::Normal),
            1 => Ok(Self::High),
            2 => Ok(Self::Realtime),
            _ => Err(CreateError::InvalidPriority { raw }),
        }
    }
}

/// Where a queue's requests read from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceType {
    File,
    Memory,
}

/// Creation-time description of a queue.
#[derive(Clone, Debug)]
pub struct QueueDesc {
    pub source_type: SourceType,
    pub capacity: u16,
    pub priority: Priority,
    pub name: Option<String>,
}

impl QueueDesc {
    /// File-sourced queue with the given capacity and priority.
    pub fn new(capacity: u16, priority: Priority) -> Self {
        Self {
            source_type: SourceType::File,
            capacity,
            priority,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(truncate_name(name.into()));
        self
    }
}

// ============================================================================
// Destinations
// ============================================================================

/// Contiguous destination buffer shared between the caller and the engine.
///
/// Cloning shares the same storage.
#[derive(Clone)]
pub struct DestBuffer {
    bytes: Arc<Mutex<Box<[u8]>>>,
    len: usize,
}

impl DestBuffer {
    /// Zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0u8; len].into_boxed_slice())),
            len,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Lock the buffer for reading or writing.
    pub fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
        lock(&self.bytes)
    }

    /// Copy the current contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().to_vec()
    }

    /// True when both handles share storage.
    pub fn same_buffer(&self, other: &DestBuffer) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl fmt::Debug for DestBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestBuffer").field("len", &self.len).finish()
    }
}

/// Array of fixed-size physical pages used as a scattered destination.
#[derive(Clone)]
pub struct PageArray {
    pages: Arc<Mutex<Vec<Box<[u8]>>>>,
    count: usize,
}

impl PageArray {
    /// `count` zero-filled pages of [`PAGE_SIZE`] bytes.
    pub fn new(count: usize) -> Self {
        let pages = (0..count)
            .map(|_| vec![0u8; PAGE_SIZE].into_boxed_slice())
            .collect();
        Self {
            pages: Arc::new(Mutex::new(pages)),
            count,
        }
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn byte_len(&self) -> usize {
        self.count * PAGE_SIZE
    }

    /// Scatter `src` into the pages starting at byte `offset`.
    fn write(&self, offset: usize, src: &[u8]) {
        let mut pages = lock(&self.pages);
        let mut pos = offset;
        let mut rest = src;
        while !rest.is_empty() {
            let page = pos / PAGE_SIZE;
            let within = pos % PAGE_SIZE;
            let take = rest.len().min(PAGE_SIZE - within);
            pages[page][within..within + take].copy_from_slice(&rest[..take]);
            rest = &rest[take..];
            pos += take;
        }
    }

    /// Gather `len` bytes starting at byte `offset`.
    pub fn read(&self, offset: usize, len: usize) -> Vec<u8> {
        let pages = lock(&self.pages);
        let mut out = Vec::with_capacity(len);
        let mut pos = offset;
        while out.len() < len {
            let page = pos / PAGE_SIZE;
            let within = pos % PAGE_SIZE;
            let take = (len - out.len()).min(PAGE_SIZE - within);
            out.extend_from_slice(&pages[page][within..within + take]);
            pos += take;
        }
        out
    }
}

impl fmt::Debug for PageArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageArray")
            .field("pages", &self.count)
            .finish()
    }
}

/// Where a request's bytes land.
#[derive(Clone, Debug)]
pub enum Destination {
    Buffer(DestBuffer),
    /// Pages starting at byte `offset` of the first page.
    Pages { pages: PageArray, offset: u32 },
}

impl Destination {
    /// Bytes available from the destination's start.
    pub fn capacity(&self) -> usize {
        match self {
            Self::Buffer(buf) => buf.len(),
            Self::Pages { pages, offset } => pages.byte_len().saturating_sub(*offset as usize),
        }
    }

    /// Copy `src` to the start of the destination.
    ///
    /// The caller has validated `src.len() <= self.capacity()`.
    pub(crate) fn write(&self, src: &[u8]) {
        match self {
            Self::Buffer(buf) => buf.lock()[..src.len()].copy_from_slice(src),
            Self::Pages { pages, offset } => pages.write(*offset as usize, src),
        }
    }

    pub(crate) fn kind(&self) -> DestinationKind {
        match self {
            Self::Buffer(_) => DestinationKind::Buffer,
            Self::Pages { .. } => DestinationKind::Pages,
        }
    }
}

/// Destination shape recorded in failure details.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestinationKind {
    Buffer,
    Pages,
}

// ============================================================================
// Request
// ============================================================================

/// Where a request's bytes come from.
#[derive(Clone)]
pub enum Source {
    File { file: Arc<OpenFile>, offset: u64 },
    /// Bytes already resident in memory; skips the read stage.
    Memory(Arc<[u8]>),
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { file, offset } => f
                .debug_struct("File")
                .field("path", &file.name())
                .field("offset", offset)
                .finish(),
            Self::Memory(bytes) => f.debug_tuple("Memory").field(&bytes.len()).finish(),
        }
    }
}

/// Decompression applied between the read and the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decompression {
    None,
    /// zlib stream. A non-zero `intermediate_size` inflates into a second
    /// staging buffer before the copy to the destination.
    Zlib { intermediate_size: u32 },
}

/// A single bulk-read request.
#[derive(Clone, Debug)]
pub struct Request {
    pub source: Source,
    pub source_size: u32,
    pub destination: Destination,
    pub dest_size: u32,
    pub decompression: Decompression,
    pub cancellation_tag: u64,
    pub name: Option<String>,
}

impl Request {
    /// Uncompressed file read of `size` bytes into `dest`.
    pub fn read_file(file: &FileHandle, offset: u64, size: u32, dest: Destination) -> Self {
        Self {
            source: Source::File {
                file: file.share(),
                offset,
            },
            source_size: size,
            destination: dest,
            dest_size: size,
            decompression: Decompression::None,
            cancellation_tag: 0,
            name: None,
        }
    }

    /// zlib-compressed file read of `source_size` bytes inflating to
    /// `dest_size` bytes.
    pub fn read_file_zlib(
        file: &FileHandle,
        offset: u64,
        source_size: u32,
        dest: Destination,
        dest_size: u32,
    ) -> Self {
        Self {
            decompression: Decompression::Zlib {
                intermediate_size: 0,
            },
            dest_size,
            ..Self::read_file(file, offset, source_size, dest)
        }
    }

    /// Request sourced from resident bytes.
    pub fn from_memory(
        bytes: Arc<[u8]>,
        dest: Destination,
        dest_size: u32,
        decompression: Decompression,
    ) -> Self {
        // Sources past u32::MAX saturate here and fail validation at enqueue.
        Self {
            source_size: u32::try_from(bytes.len()).unwrap_or(u32::MAX),
            source: Source::Memory(bytes),
            destination: dest,
            dest_size,
            decompression,
            cancellation_tag: 0,
            name: None,
        }
    }

    pub fn with_tag(mut self, tag: u64) -> Self {
        self.cancellation_tag = tag;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(truncate_name(name.into()));
        self
    }

    pub fn with_intermediate(mut self, intermediate_size: u32) -> Self {
        if let Decompression::Zlib { .. } = self.decompression {
            self.decompression = Decompression::Zlib { intermediate_size };
        }
        self
    }

    #[inline]
    pub fn is_compressed(&self) -> bool {
        !matches!(self.decompression, Decompression::None)
    }

    #[inline]
    pub fn is_memory(&self) -> bool {
        matches!(self.source, Source::Memory(_))
    }

    /// File offset, or 0 for memory sources.
    pub fn offset(&self) -> u64 {
        match &self.source {
            Source::File { offset, .. } => *offset,
            Source::Memory(_) => 0,
        }
    }

    /// Display name of the source file, if any.
    pub fn file_name(&self) -> Option<&str> {
        match &self.source {
            Source::File { file, .. } => Some(file.name()),
            Source::Memory(_) => None,
        }
    }

    /// Intermediate buffer size, or 0 when none is used.
    pub(crate) fn intermediate_size(&self) -> u32 {
        match self.decompression {
            Decompression::Zlib { intermediate_size } => intermediate_size,
            Decompression::None => 0,
        }
    }
}

/// Clamp a debug name to [`MAX_NAME_LEN`] bytes on a char boundary.
pub(crate) fn truncate_name(mut name: String) -> String {
    if name.len() > MAX_NAME_LEN {
        let mut cut = MAX_NAME_LEN;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
    }
    name
}
