//! Priority-threshold queue selection.
//!
//! Tiers are scanned `Low -> Normal -> High -> Realtime`, wrapping around.
//! The scan starts at the lowest tier that is *due*, where a tier is due
//! when `serviced % THRESHOLDS[tier] == 0`. High and Realtime are always
//! due, so the start is one of Low, Normal or High, and a lower tier gets
//! the first look once every `threshold` services. Within a tier, queues
//! are visited round-robin starting just after the last one visited.
//!
//! With Realtime, Normal and Low queues all backlogged the long-run service
//! split is 90 / 9 / 1.

use crate::request::Priority;

/// Due-period per tier, indexed by [`Priority::index`].
pub(crate) const THRESHOLDS: [u64; 4] = [100, 10, 1, 1];

#[derive(Debug)]
pub(crate) struct PrioritySelector {
    serviced: u64,
    last: Option<usize>,
}

impl Default for PrioritySelector {
    fn default() -> Self {
        Self::new()
    }
}

impl PrioritySelector {
    pub(crate) fn new() -> Self {
        Self {
            serviced: 1,
            last: None,
        }
    }

    /// Lowest due tier.
    fn start_tier(&self) -> usize {
        THRESHOLDS
            .iter()
            .position(|&t| self.serviced % t == 0)
            .unwrap_or(Priority::High.index())
    }

    /// Pick the next of `len` queues to visit.
    ///
    /// `tier_of(i)` is queue `i`'s tier index; `eligible(i)` says whether it
    /// has work. Returns the queue index, or `None` when no queue is
    /// eligible. Does not update any state; report the outcome with
    /// [`record_serviced`](Self::record_serviced) or
    /// [`record_visited`](Self::record_visited).
    pub(crate) fn select(
        &self,
        len: usize,
        tier_of: impl Fn(usize) -> usize,
        mut eligible: impl FnMut(usize) -> bool,
    ) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let start = self.start_tier();
        let after = self.last.map_or(len - 1, |l| l % len);
        for step in 0..THRESHOLDS.len() {
            let tier = (start + step) % THRESHOLDS.len();
            for offset in 1..=len {
                let idx = (after + offset) % len;
                if tier_of(idx) == tier && eligible(idx) {
                    return Some(idx);
                }
            }
        }
        None
    }

    /// Queue `idx` did one unit of work.
    #[inline]
    pub(crate) fn record_serviced(&mut self, idx: usize) {
        self.serviced = self.serviced.wrapping_add(1);
        self.last = Some(idx);
    }

    /// Queue `idx` was visited but had nothing to do.
    #[inline]
    pub(crate) fn record_visited(&mut self, idx: usize) {
        self.last = Some(idx);
    }

    #[cfg(test)]
    fn serviced(&self) -> u64 {
        self.serviced
    }
}
