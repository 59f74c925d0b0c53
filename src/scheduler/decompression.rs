//! Decompression pump.
//!
//! Several loops may run a pass at once. Queue selection is serialized on
//! the shared selector; the inflate itself runs with no scheduler lock held.
//! Two loops that pick the same queue race for its entry, and the loser sees
//! `NothingToDecompress`.

use super::Shared;
use crate::queue::ring::DecompressOutcome;
use crate::sync::lock;
use std::sync::Arc;

/// Inflate until no queue has ready work or staging runs dry.
///
/// Returns the number of entries processed.
pub(crate) fn run_pass(shared: &Shared) -> usize {
    let codec = Arc::clone(&shared.config.codec);
    let mut done = 0;
    let mut misses = 0;
    loop {
        let (idx, queue) = {
            let selector = lock(&shared.decompress_selector);
            let table = lock(&shared.table);
            let queues = &table.queues;
            if misses > queues.len() {
                break;
            }
            let Some(idx) = selector.select(
                queues.len(),
                |i| queues[i].desc().priority.index(),
                |i| queues[i].has_decompressible(),
            ) else {
                break;
            };
            (idx, Arc::clone(&queues[idx]))
        };

        match queue.decompress_next_request(codec.as_ref()) {
            DecompressOutcome::Decompressed => {
                lock(&shared.decompress_selector).record_serviced(idx);
                done += 1;
                misses = 0;
            }
            DecompressOutcome::NothingToDecompress => {
                lock(&shared.decompress_selector).record_visited(idx);
                misses += 1;
            }
            DecompressOutcome::WaitingOnMemory => {
                log::trace!("decompression pass: waiting on staging memory");
                break;
            }
        }
    }
    if done > 0 {
        log::trace!("decompression pass: {done} entries");
    }
    done
}
