//! Submission pump: completions in, reads out.
//!
//! One pass:
//! 1. Drain backend completions and hand each to the queue that issued it.
//! 2. While fewer than `max_in_flight` reads are outstanding, pick a queue
//!    with submitted work and issue its next read.
//!
//! A queue that reports `WaitingOnMemory` ends the pass without touching the
//! selector, so it is picked again first once staging frees up.

use super::selection::PrioritySelector;
use crate::backend::{Completion, CompletionWaker, IoBackend};
use crate::queue::ring::{QueueCore, SubmitOutcome};
use std::sync::Arc;

/// What one pump pass did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Reads handed to the backend.
    pub submitted: usize,
    /// Backend completions processed.
    pub completions: usize,
    /// The pass stopped on staging exhaustion.
    pub waiting_on_memory: bool,
    /// Some queue has entries ready to inflate.
    pub decompress_ready: bool,
}

impl PumpReport {
    #[inline]
    pub fn made_progress(&self) -> bool {
        self.submitted > 0 || self.completions > 0
    }
}

pub(crate) struct SubmissionPump {
    backend: Box<dyn IoBackend>,
    selector: PrioritySelector,
    completions: Vec<Completion>,
    max_in_flight: usize,
}

impl SubmissionPump {
    pub(crate) fn new(backend: Box<dyn IoBackend>, max_in_flight: usize) -> Self {
        Self {
            backend,
            selector: PrioritySelector::new(),
            completions: Vec::with_capacity(max_in_flight),
            max_in_flight,
        }
    }

    pub(crate) fn set_completion_waker(&mut self, waker: CompletionWaker) {
        self.backend.set_completion_waker(waker);
    }

    #[inline]
    pub(crate) fn in_flight(&self) -> usize {
        self.backend.in_flight()
    }

    pub(crate) fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// One full pass over `queues`.
    pub(crate) fn pump(&mut self, queues: &[Arc<QueueCore>]) -> PumpReport {
        let mut report = PumpReport {
            completions: self.complete(queues),
            ..PumpReport::default()
        };
        self.issue(queues, &mut report);
        report.decompress_ready = queues.iter().any(|q| q.has_decompressible());
        if report.made_progress() || report.waiting_on_memory {
            log::trace!(
                "submission pass: issued={} completed={} waiting_on_memory={} in_flight={}",
                report.submitted,
                report.completions,
                report.waiting_on_memory,
                self.backend.in_flight()
            );
        }
        report
    }

    /// Drain finished reads into their queues.
    pub(crate) fn complete(&mut self, queues: &[Arc<QueueCore>]) -> usize {
        let n = self.backend.poll(&mut self.completions);
        for completion in self.completions.drain(..) {
            let id = completion.token.queue;
            match queues.iter().find(|q| q.id() == id) {
                Some(queue) => queue.on_read_complete(completion),
                None => log::warn!("completion for unknown queue {id:?} dropped"),
            }
        }
        n
    }

    fn issue(&mut self, queues: &[Arc<QueueCore>], report: &mut PumpReport) {
        // Every queue may report nothing once through a race with its own
        // cursors; past that the pass is idle.
        let mut misses = 0;
        while self.backend.in_flight() < self.max_in_flight && misses <= queues.len() {
            let Some(idx) = self.selector.select(
                queues.len(),
                |i| queues[i].desc().priority.index(),
                |i| queues[i].has_submittable(),
            ) else {
                break;
            };
            match queues[idx].submit_next_request(self.backend.as_mut()) {
                SubmitOutcome::Submitted => {
                    self.selector.record_serviced(idx);
                    report.submitted += 1;
                    misses = 0;
                }
                SubmitOutcome::WaitingOnMemory => {
                    report.waiting_on_memory = true;
                    break;
                }
                SubmitOutcome::Failed => {
                    self.selector.record_visited(idx);
                    misses = 0;
                }
                SubmitOutcome::NothingToSubmit => {
                    self.selector.record_visited(idx);
                    misses += 1;
                }
            }
        }
    }
}

impl std::fmt::Debug for SubmissionPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionPump")
            .field("backend", &self.backend.name())
            .field("in_flight", &self.backend.in_flight())
            .field("max_in_flight", &self.max_in_flight)
            .finish()
    }
}
