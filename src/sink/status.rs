use crate::error::ErrorCode;
use crate::request::truncate_name;
use crate::sync::lock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct Inner {
    name: Option<String>,
    complete: Box<[AtomicBool]>,
    results: Mutex<Box<[ErrorCode]>>,
}

/// Array of pollable completion slots.
///
/// A slot reverts to incomplete the moment it is enqueued and must not be
/// enqueued again until [`StatusArray::is_complete`] has been observed true.
/// Cloning shares the slots.
#[derive(Clone)]
pub struct StatusArray {
    inner: Arc<Inner>,
}

impl StatusArray {
    /// Array of `capacity` slots, all initially complete with `Ok`.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: u32, name: Option<&str>) -> Self {
        assert!(capacity > 0, "status array capacity must be > 0");
        let complete = (0..capacity).map(|_| AtomicBool::new(true)).collect();
        let results = vec![ErrorCode::Ok; capacity as usize].into_boxed_slice();
        Self {
            inner: Arc::new(Inner {
                name: name.map(|n| truncate_name(n.to_owned())),
                complete,
                results: Mutex::new(results),
            }),
        }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.inner.complete.len() as u32
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.complete.is_empty()
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// True once every entry ahead of the slot's status write is terminal.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    #[inline]
    pub fn is_complete(&self, index: u32) -> bool {
        self.inner.complete[index as usize].load(Ordering::Acquire)
    }

    /// `Pending` while incomplete, else `Ok` or the first error covered.
    ///
    /// # Panics
    /// Panics if `index` is out of range.
    pub fn get_result(&self, index: u32) -> ErrorCode {
        if !self.is_complete(index) {
            return ErrorCode::Pending;
        }
        lock(&self.inner.results)[index as usize]
    }

    pub(crate) fn mark_incomplete(&self, index: u32) {
        self.inner.complete[index as usize].store(false, Ordering::Release);
    }

    pub(crate) fn complete(&self, index: u32, result: ErrorCode) {
        lock(&self.inner.results)[index as usize] = result;
        self.inner.complete[index as usize].store(true, Ordering::Release);
    }
}

impl fmt::Debug for StatusArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusArray")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .finish()
    }
}
