use crate::request::truncate_name;
use crate::sync::{lock, wait_timeout};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

struct Inner {
    name: Option<String>,
    value: Mutex<u64>,
    cv: Condvar,
}

/// Monotonic completion counter.
///
/// Signalling a value lower than the current one is ignored.
#[derive(Clone)]
pub struct Fence {
    inner: Arc<Inner>,
}

impl Fence {
    pub fn new(name: Option<&str>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.map(|n| truncate_name(n.to_owned())),
                value: Mutex::new(0),
                cv: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    /// Highest value signalled so far.
    pub fn completed_value(&self) -> u64 {
        *lock(&self.inner.value)
    }

    /// Raise the fence to `value` and wake waiters.
    pub fn signal(&self, value: u64) {
        let mut cur = lock(&self.inner.value);
        if value > *cur {
            *cur = value;
            self.inner.cv.notify_all();
        }
    }

    /// Wait until the fence reaches `value` or `timeout` elapses.
    ///
    /// Returns true if the value was reached.
    pub fn wait(&self, value: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cur = lock(&self.inner.value);
        while *cur < value {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            cur = wait_timeout(&self.inner.cv, cur, deadline - now);
        }
        true
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("name", &self.inner.name)
            .field("value", &self.completed_value())
            .finish()
    }
}
