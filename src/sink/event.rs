use crate::sync::{lock, wait_timeout};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Whether a successful wait clears the event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventReset {
    Auto,
    Manual,
}

struct Inner {
    reset: EventReset,
    signaled: Mutex<bool>,
    cv: Condvar,
}

/// Binary signal with auto- or manual-reset semantics.
#[derive(Clone)]
pub struct Event {
    inner: Arc<Inner>,
}

impl Event {
    pub fn new(reset: EventReset) -> Self {
        Self {
            inner: Arc::new(Inner {
                reset,
                signaled: Mutex::new(false),
                cv: Condvar::new(),
            }),
        }
    }

    pub fn set(&self) {
        *lock(&self.inner.signaled) = true;
        match self.inner.reset {
            EventReset::Auto => self.inner.cv.notify_one(),
            EventReset::Manual => self.inner.cv.notify_all(),
        }
    }

    pub fn reset(&self) {
        *lock(&self.inner.signaled) = false;
    }

    /// Current state without consuming it.
    pub fn is_set(&self) -> bool {
        *lock(&self.inner.signaled)
    }

    /// Wait up to `timeout` for the event. Auto-reset events are cleared by
    /// a successful wait.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = lock(&self.inner.signaled);
        while !*signaled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            signaled = wait_timeout(&self.inner.cv, signaled, deadline - now);
        }
        if self.inner.reset == EventReset::Auto {
            *signaled = false;
        }
        true
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("reset", &self.inner.reset)
            .field("set", &self.is_set())
            .finish()
    }
}
