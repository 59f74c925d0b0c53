//! Caller threads and decompression loops sharing one queue.

use crate::support::{counter_bytes, init_logging, wait_status, zlib};
use offload_rs::{
    Decompression, DestBuffer, Destination, ErrorCode, Priority, QueueDesc, Request, Scheduler,
    SchedulerConfig, StatusArray,
};
use std::sync::Arc;
use std::thread;

const CALLERS: usize = 4;
const BATCHES: u32 = 50;
const PER_BATCH: usize = 8;

#[test]
fn racing_callers_and_inflaters_deliver_every_request() {
    init_logging();
    let scheduler = Scheduler::new(SchedulerConfig {
        io_workers: 2,
        decompression_threads: 4,
        ..SchedulerConfig::default()
    })
    .unwrap();
    let queue = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::Normal))
        .unwrap();

    thread::scope(|s| {
        for caller in 0..CALLERS {
            let queue = &queue;
            s.spawn(move || {
                let plain = counter_bytes(caller as u64 * 65_536, 6_000);
                let packed: Arc<[u8]> = zlib(&plain).into();
                let status = StatusArray::new(BATCHES, None);
                let mut dests = Vec::with_capacity(BATCHES as usize * PER_BATCH);

                for batch in 0..BATCHES {
                    for _ in 0..PER_BATCH {
                        let dest = DestBuffer::new(plain.len());
                        queue
                            .enqueue_request(Request::from_memory(
                                Arc::clone(&packed),
                                Destination::Buffer(dest.clone()),
                                plain.len() as u32,
                                Decompression::Zlib {
                                    intermediate_size: 0,
                                },
                            ))
                            .unwrap();
                        dests.push(dest);
                    }
                    queue.enqueue_status(&status, batch).unwrap();
                    queue.submit();
                }

                for batch in 0..BATCHES {
                    assert_eq!(wait_status(&status, batch), ErrorCode::Ok, "batch {batch}");
                }
                for (i, dest) in dests.iter().enumerate() {
                    assert!(dest.to_vec() == plain, "caller {caller} request {i}");
                }
            });
        }
    });

    // Every caller ends on a status write, so the last entry has completed.
    let total = (CALLERS * (BATCHES as usize * (PER_BATCH + 1))) as u64;
    let c = queue.cursors();
    assert_eq!(c.enqueued, total);
    assert_eq!(c.submitted, total);
    assert_eq!(c.read, total);
    assert_eq!(c.not_complete, total);
    assert!(queue.retrieve_error_record().is_empty());
    assert_eq!(scheduler.staging_stats().in_use, 0);
}
