//! Open-file registry.
//!
//! Files are deduplicated by a hash of their normalized path (case folded,
//! separators folded), so two queues opening the same asset share one OS
//! handle. Each successful [`FileRegistry::open`] returns an owning
//! [`FileHandle`]; the record is dropped and marked closed when the last
//! handle for it goes away.
//!
//! Requests capture the shared [`OpenFile`] rather than the handle, so reads
//! already in the engine keep the OS file alive after the caller closes it.

use crate::error::CreateError;
use crate::sync::lock;
use ahash::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::hash::BuildHasher;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Registry-assigned file identifier (for diagnostics only).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FileId(pub u32);

/// An opened file shared by the registry and in-flight requests.
pub struct OpenFile {
    id: FileId,
    hash: u64,
    path: PathBuf,
    name: String,
    size: u64,
    file: File,
    closed: AtomicBool,
}

impl OpenFile {
    #[inline]
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Size cached when the file was opened.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Display name (the path as given to `open`).
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn path_hash(&self) -> u64 {
        self.hash
    }

    /// True once every handle for this file has been dropped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Positional read that keeps going until `buf` is full or the file ends.
    ///
    /// Returns the number of bytes read. Does not move any shared cursor, so
    /// concurrent reads on the same file are fine.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut done = 0usize;
        while done < buf.len() {
            match read_at_once(&self.file, &mut buf[done..], offset + done as u64) {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(done)
    }
}

#[cfg(unix)]
fn read_at_once(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at_once(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

impl fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Fold case and path separators so equivalent spellings hash alike.
pub fn normalize_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len());
    let mut prev_sep = false;
    for ch in raw.chars() {
        let is_sep = ch == '/' || ch == '\\';
        if is_sep {
            if !prev_sep {
                out.push('/');
            }
        } else {
            out.extend(ch.to_lowercase());
        }
        prev_sep = is_sep;
    }
    out
}

struct Record {
    normalized: String,
    file: Arc<OpenFile>,
    refs: usize,
}

struct Registry {
    max_files: usize,
    hasher: RandomState,
    next_id: AtomicU32,
    records: Mutex<HashMap<u64, Vec<Record>>>,
}

impl Registry {
    fn release(&self, file: &OpenFile) {
        let mut records = lock(&self.records);
        let Some(bucket) = records.get_mut(&file.hash) else {
            return;
        };
        let Some(pos) = bucket
            .iter()
            .position(|r| std::ptr::eq(Arc::as_ptr(&r.file), file))
        else {
            return;
        };
        bucket[pos].refs -= 1;
        if bucket[pos].refs == 0 {
            let record = bucket.swap_remove(pos);
            record.file.closed.store(true, Ordering::Release);
            log::debug!("closed file {} ({:?})", record.file.name, record.file.id);
            if bucket.is_empty() {
                records.remove(&file.hash);
            }
        }
    }
}

/// Deduplicating, reference-counted registry of open files.
#[derive(Clone)]
pub struct FileRegistry {
    inner: Arc<Registry>,
}

impl FileRegistry {
    pub fn new(max_files: usize) -> Self {
        assert!(max_files > 0, "max_files must be > 0");
        Self {
            inner: Arc::new(Registry {
                max_files,
                hasher: RandomState::new(),
                next_id: AtomicU32::new(0),
                records: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Open `path`, reusing an existing record for an equivalent path.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<FileHandle, CreateError> {
        let path = path.as_ref();
        let normalized = normalize_path(path);
        let hash = self.inner.hasher.hash_one(&normalized);

        let mut records = lock(&self.inner.records);
        if let Some(record) = records
            .get_mut(&hash)
            .and_then(|bucket| bucket.iter_mut().find(|r| r.normalized == normalized))
        {
            record.refs += 1;
            return Ok(FileHandle {
                file: Arc::clone(&record.file),
                registry: Arc::clone(&self.inner),
            });
        }

        let open: usize = records.values().map(Vec::len).sum();
        if open >= self.inner.max_files {
            return Err(CreateError::TooManyFiles {
                max: self.inner.max_files,
            });
        }

        let file = File::open(path)?;
        let size = file.metadata()?.len();
        let id = FileId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(OpenFile {
            id,
            hash,
            path: path.to_path_buf(),
            name: path.display().to_string(),
            size,
            file,
            closed: AtomicBool::new(false),
        });
        log::debug!("opened file {} ({id:?}, {size} bytes)", shared.name);
        records.entry(hash).or_default().push(Record {
            normalized,
            file: Arc::clone(&shared),
            refs: 1,
        });
        Ok(FileHandle {
            file: shared,
            registry: Arc::clone(&self.inner),
        })
    }

    /// Release one reference. Equivalent to dropping the handle.
    pub fn close(&self, handle: FileHandle) {
        drop(handle);
    }

    /// Cached size of the handle's file.
    pub fn size(&self, handle: &FileHandle) -> u64 {
        handle.size()
    }

    /// Display name of the handle's file.
    pub fn name<'a>(&self, handle: &'a FileHandle) -> &'a str {
        handle.name()
    }

    /// Distinct files currently open.
    pub fn open_count(&self) -> usize {
        lock(&self.inner.records).values().map(Vec::len).sum()
    }

    /// References held on `handle`'s record (0 if closed).
    pub fn ref_count(&self, handle: &FileHandle) -> usize {
        lock(&self.inner.records)
            .get(&handle.file.hash)
            .and_then(|bucket| {
                bucket
                    .iter()
                    .find(|r| Arc::ptr_eq(&r.file, &handle.file))
                    .map(|r| r.refs)
            })
            .unwrap_or(0)
    }
}

impl fmt::Debug for FileRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRegistry")
            .field("max_files", &self.inner.max_files)
            .field("open", &self.open_count())
            .finish()
    }
}

/// Owning reference to a registry record. Dropping it releases the
/// reference.
pub struct FileHandle {
    file: Arc<OpenFile>,
    registry: Arc<Registry>,
}

impl FileHandle {
    #[inline]
    pub fn size(&self) -> u64 {
        self.file.size
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.file.name
    }

    #[inline]
    pub fn id(&self) -> FileId {
        self.file.id
    }

    /// Shared file for a request to carry.
    #[inline]
    pub(crate) fn share(&self) -> Arc<OpenFile> {
        Arc::clone(&self.file)
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.file, f)
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        self.registry.release(&self.file);
    }
}
