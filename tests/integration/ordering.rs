//! Round-trip correctness and per-queue FIFO completion.

use crate::support::{counter_bytes, counter_file, driven, threaded, wait_status};
use offload_rs::{
    DestBuffer, Destination, ErrorCode, Fence, PageArray, Priority, QueueDesc, Request,
    SchedulerConfig, StatusArray,
};
use std::time::Duration;

#[test]
fn fifty_sequential_4k_reads_land_in_their_own_buffers() {
    let file = counter_file(50 * 4096);
    let scheduler = threaded();
    let handle = scheduler.open_file(&file.path).unwrap();
    let queue = scheduler
        .create_queue(QueueDesc::new(128, Priority::Normal).with_name("sequential"))
        .unwrap();

    let dests: Vec<DestBuffer> = (0..50).map(|_| DestBuffer::new(4096)).collect();
    for (i, dest) in dests.iter().enumerate() {
        queue
            .enqueue_request(Request::read_file(
                &handle,
                i as u64 * 4096,
                4096,
                Destination::Buffer(dest.clone()),
            ))
            .unwrap();
    }
    let status = StatusArray::new(1, None);
    queue.enqueue_status(&status, 0).unwrap();
    queue.submit();

    assert_eq!(wait_status(&status, 0), ErrorCode::Ok);
    for (i, dest) in dests.iter().enumerate() {
        assert_eq!(dest.to_vec(), counter_bytes(i as u64 * 4096, 4096), "buffer {i}");
    }
    assert_eq!(scheduler.staging_stats().in_use, 0);
}

#[test]
fn unaligned_ranges_round_trip_through_staging() {
    let file = counter_file(1 << 20);
    let scheduler = driven(SchedulerConfig::default());
    let handle = scheduler.open_file(&file.path).unwrap();
    let queue = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::High))
        .unwrap();

    let ranges = [(1u64, 1u32), (4095, 2), (5000, 10_000), (123_457, 70_001), (0, 4096)];
    let dests: Vec<DestBuffer> = ranges
        .iter()
        .map(|&(_, len)| DestBuffer::new(len as usize))
        .collect();
    for (&(offset, len), dest) in ranges.iter().zip(&dests) {
        queue
            .enqueue_request(Request::read_file(
                &handle,
                offset,
                len,
                Destination::Buffer(dest.clone()),
            ))
            .unwrap();
    }
    let status = StatusArray::new(1, None);
    queue.enqueue_status(&status, 0).unwrap();
    queue.submit();
    scheduler.run_until_idle();

    assert_eq!(status.get_result(0), ErrorCode::Ok);
    for (&(offset, len), dest) in ranges.iter().zip(&dests) {
        assert_eq!(dest.to_vec(), counter_bytes(offset, len as usize));
    }
    let stats = scheduler.staging_stats();
    assert_eq!(stats.in_use, 0);
    assert!(stats.high_water > 0);
}

#[test]
fn page_destination_spans_page_boundaries() {
    let file = counter_file(1 << 20);
    let scheduler = driven(SchedulerConfig::default());
    let handle = scheduler.open_file(&file.path).unwrap();
    let queue = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::Normal))
        .unwrap();

    let pages = PageArray::new(2);
    queue
        .enqueue_request(Request::read_file(
            &handle,
            8192,
            100_000,
            Destination::Pages {
                pages: pages.clone(),
                offset: 1000,
            },
        ))
        .unwrap();
    let status = StatusArray::new(1, None);
    queue.enqueue_status(&status, 0).unwrap();
    queue.submit();
    scheduler.run_until_idle();

    assert_eq!(status.get_result(0), ErrorCode::Ok);
    assert_eq!(pages.read(1000, 100_000), counter_bytes(8192, 100_000));
    assert_eq!(pages.read(0, 1000), vec![0u8; 1000]);
}

#[test]
fn status_waits_for_every_earlier_entry() {
    let file = counter_file(64 * 1024);
    let scheduler = driven(SchedulerConfig::default());
    let handle = scheduler.open_file(&file.path).unwrap();
    let queue = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::Normal))
        .unwrap();
    let status = StatusArray::new(3, None);

    queue
        .enqueue_request(Request::read_file(
            &handle,
            0,
            4096,
            Destination::Buffer(DestBuffer::new(4096)),
        ))
        .unwrap();
    queue.enqueue_status(&status, 0).unwrap();
    queue
        .enqueue_request(Request::read_file(
            &handle,
            100,
            50,
            Destination::Buffer(DestBuffer::new(50)),
        ))
        .unwrap();
    queue.enqueue_status(&status, 1).unwrap();
    queue.enqueue_status(&status, 2).unwrap();

    assert!(!status.is_complete(0));
    queue.submit();
    assert!(!status.is_complete(0), "reads have not run yet");

    // One pass issues both reads; completions are collected on the next.
    scheduler.pump_submission();
    assert!(!status.is_complete(0));
    scheduler.pump_submission();
    for i in 0..3 {
        assert_eq!(status.get_result(i), ErrorCode::Ok);
    }
    let c = queue.cursors();
    assert_eq!((c.not_complete, c.read, c.submitted, c.enqueued), (5, 5, 5, 5));
}

#[test]
fn fence_values_rise_in_enqueue_order() {
    let file = counter_file(256 * 1024);
    let scheduler = threaded();
    let handle = scheduler.open_file(&file.path).unwrap();
    let queue = scheduler
        .create_queue(QueueDesc::new(0x100, Priority::Realtime))
        .unwrap();
    let fence = Fence::new(Some("frame"));

    let mut dests = Vec::new();
    for value in 1..=8u64 {
        for j in 0..8u64 {
            let offset = (value * 8 + j) * 1000;
            let dest = DestBuffer::new(1000);
            queue
                .enqueue_request(Request::read_file(
                    &handle,
                    offset,
                    1000,
                    Destination::Buffer(dest.clone()),
                ))
                .unwrap();
            dests.push((offset, dest));
        }
        queue.enqueue_signal(&fence, value).unwrap();
    }
    queue.submit();

    assert!(fence.wait(8, Duration::from_secs(10)));
    assert_eq!(fence.completed_value(), 8);
    for (offset, dest) in &dests {
        assert_eq!(dest.to_vec(), counter_bytes(*offset, 1000));
    }
}
