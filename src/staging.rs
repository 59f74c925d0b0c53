//! Staging Memory Allocator
//!
//! # Purpose
//!
//! Scratch buffers for reads whose caller range is not block aligned and for
//! compressed reads that need somewhere to land before inflation. The
//! allocator is shared by every queue and both loop kinds, so it is the most
//! contended resource in the engine.
//!
//! # Design
//!
//! - **Byte budget**: allocations are charged against a capacity under one
//!   mutex. `allocate` never blocks; it returns `None` when the budget is
//!   exhausted and the caller retries later.
//! - **Size classes**: charges are rounded to power-of-two classes starting
//!   at the block size. Returned buffers are parked in a small lock-free
//!   cache per class so steady-state traffic does not hit the system
//!   allocator.
//! - **RAII handles**: a [`StagingBuffer`] returns its charge on drop, so a
//!   buffer can travel through the backend and back without leaking budget.
//!
//! # Correctness Invariants
//!
//! - `in_use <= capacity` right after every successful allocation.
//! - `in_use` equals the sum of charges of live buffers.
//! - Cached buffers are not charged.
//!
//! Shrinking the capacity below `in_use` is allowed; new allocations fail
//! until enough buffers have been returned.

use crate::config::BLOCK_ALIGN;
use crate::sync::lock;
use crossbeam_queue::ArrayQueue;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Smallest size class (one block).
const MIN_CLASS_SHIFT: u32 = BLOCK_ALIGN.trailing_zeros();

/// Largest size class (covers any `u32` length plus alignment head).
const MAX_CLASS_SHIFT: u32 = 33;

const CLASS_COUNT: usize = (MAX_CLASS_SHIFT - MIN_CLASS_SHIFT + 1) as usize;

/// Idle buffers kept per size class.
const CACHE_PER_CLASS: usize = 8;

/// Classes above this are never cached.
const MAX_CACHED_CLASS_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug)]
struct Accounting {
    capacity: u64,
    in_use: u64,
    high_water: u64,
    failed: u64,
}

struct Inner {
    acct: Mutex<Accounting>,
    cache: Box<[ArrayQueue<Box<[u8]>>]>,
}

/// Snapshot of allocator counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StagingStats {
    pub capacity: u64,
    pub in_use: u64,
    pub high_water: u64,
    pub failed_allocations: u64,
}

/// Bounded staging-memory allocator.
///
/// Cheap to clone; clones share one budget.
#[derive(Clone)]
pub struct StagingAllocator {
    inner: Arc<Inner>,
}

impl StagingAllocator {
    /// Create an allocator holding at most `capacity` bytes.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: u64) -> Self {
        assert!(capacity > 0, "staging capacity must be > 0");
        let cache = (0..CLASS_COUNT)
            .map(|_| ArrayQueue::new(CACHE_PER_CLASS))
            .collect();
        Self {
            inner: Arc::new(Inner {
                acct: Mutex::new(Accounting {
                    capacity,
                    in_use: 0,
                    high_water: 0,
                    failed: 0,
                }),
                cache,
            }),
        }
    }

    /// Bytes charged for an allocation of `len` bytes.
    #[inline]
    pub fn charge_for(len: u64) -> u64 {
        len.max(BLOCK_ALIGN).next_power_of_two()
    }

    /// True if an allocation of `len` bytes could ever succeed at the
    /// current capacity.
    pub fn fits(&self, len: u64) -> bool {
        Self::charge_for(len) <= lock(&self.inner.acct).capacity
    }

    /// Try to allocate a buffer of `len` bytes. Never blocks.
    ///
    /// Returns `None` when the budget cannot cover the charge.
    pub fn allocate(&self, len: usize) -> Option<StagingBuffer> {
        debug_assert!(len > 0, "zero-length staging allocation");
        let charge = Self::charge_for(len as u64);
        let class = class_index(charge);
        {
            let mut acct = lock(&self.inner.acct);
            if acct.in_use + charge > acct.capacity {
                acct.failed += 1;
                return None;
            }
            acct.in_use += charge;
            acct.high_water = acct.high_water.max(acct.in_use);
        }

        let bytes = self.inner.cache[class]
            .pop()
            .unwrap_or_else(|| vec![0u8; charge as usize].into_boxed_slice());
        Some(StagingBuffer {
            bytes,
            len,
            charge,
            owner: Arc::clone(&self.inner),
        })
    }

    /// Return a buffer. Equivalent to dropping it.
    #[inline]
    pub fn free(&self, buf: StagingBuffer) {
        drop(buf);
    }

    /// Change the budget. Existing buffers stay valid.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn set_capacity(&self, capacity: u64) {
        assert!(capacity > 0, "staging capacity must be > 0");
        let mut acct = lock(&self.inner.acct);
        log::debug!(
            "staging capacity {} -> {} (in use {})",
            acct.capacity,
            capacity,
            acct.in_use
        );
        acct.capacity = capacity;
    }

    pub fn stats(&self) -> StagingStats {
        let acct = lock(&self.inner.acct);
        StagingStats {
            capacity: acct.capacity,
            in_use: acct.in_use,
            high_water: acct.high_water,
            failed_allocations: acct.failed,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        lock(&self.inner.acct).capacity
    }

    #[inline]
    pub fn in_use(&self) -> u64 {
        lock(&self.inner.acct).in_use
    }
}

impl fmt::Debug for StagingAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingAllocator")
            .field("stats", &self.stats())
            .finish()
    }
}

#[inline]
fn class_index(charge: u64) -> usize {
    debug_assert!(charge.is_power_of_two());
    (charge.trailing_zeros() - MIN_CLASS_SHIFT) as usize
}

/// RAII staging buffer. Returns its charge to the allocator on drop.
pub struct StagingBuffer {
    bytes: Box<[u8]>,
    len: usize,
    charge: u64,
    owner: Arc<Inner>,
}

impl StagingBuffer {
    /// Usable length (the requested length, not the class size).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn charge(&self) -> u64 {
        self.charge
    }
}

impl Deref for StagingBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl DerefMut for StagingBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len]
    }
}

impl fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("len", &self.len)
            .field("charge", &self.charge)
            .finish()
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        {
            let mut acct = lock(&self.owner.acct);
            debug_assert!(acct.in_use >= self.charge, "staging over-release");
            acct.in_use -= self.charge;
        }
        if self.charge <= MAX_CACHED_CLASS_BYTES {
            let bytes = std::mem::take(&mut self.bytes);
            // Full cache: let the buffer go back to the system allocator.
            let _ = self.owner.cache[class_index(self.charge)].push(bytes);
        }
    }
}
