//! Tag-based cancellation.

use crate::support::{counter_bytes, counter_file, driven};
use offload_rs::{
    DestBuffer, Destination, EntryState, ErrorCode, Priority, QueueDesc, Request,
    SchedulerConfig, StatusArray,
};

#[test]
fn cancels_exactly_the_matching_tags() {
    let file = counter_file(64 * 1024);
    let scheduler = driven(SchedulerConfig::default());
    let handle = scheduler.open_file(&file.path).unwrap();
    let queue = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::Normal))
        .unwrap();

    // Tag layout: high byte is a group, low byte an item.
    let tags = [0x0100u64, 0x0101, 0x0200, 0x0102, 0x0300];
    let dests: Vec<DestBuffer> = tags.iter().map(|_| DestBuffer::new(256)).collect();
    for (i, (&tag, dest)) in tags.iter().zip(&dests).enumerate() {
        queue
            .enqueue_request(
                Request::read_file(
                    &handle,
                    i as u64 * 256,
                    256,
                    Destination::Buffer(dest.clone()),
                )
                .with_tag(tag),
            )
            .unwrap();
    }
    let status = StatusArray::new(1, None);
    queue.enqueue_status(&status, 0).unwrap();

    assert_eq!(queue.cancel_requests_with_tag(0xFF00, 0x0100), 3);
    assert_eq!(queue.cancel_requests_with_tag(0xFF00, 0x0100), 0);
    assert_eq!(queue.entry_state(1), Some(EntryState::Cancelled));
    assert_eq!(queue.entry_state(2), Some(EntryState::Pending));
    queue.submit();
    scheduler.run_until_idle();

    assert_eq!(queue.entry_state(0), None);
    // Cancellation is not a failure.
    assert_eq!(status.get_result(0), ErrorCode::Ok);
    assert!(queue.retrieve_error_record().is_empty());
    for (i, (&tag, dest)) in tags.iter().zip(&dests).enumerate() {
        if tag & 0xFF00 == 0x0100 {
            assert_eq!(dest.to_vec(), vec![0u8; 256], "cancelled request {i} read");
        } else {
            assert_eq!(dest.to_vec(), counter_bytes(i as u64 * 256, 256));
        }
    }
}

#[test]
fn reads_already_issued_are_not_cancelled() {
    let file = counter_file(64 * 1024);
    let scheduler = driven(SchedulerConfig::default());
    let handle = scheduler.open_file(&file.path).unwrap();
    let queue = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::Normal))
        .unwrap();

    let issued = DestBuffer::new(4096);
    queue
        .enqueue_request(
            Request::read_file(&handle, 0, 4096, Destination::Buffer(issued.clone())).with_tag(7),
        )
        .unwrap();
    queue.submit();
    // Issues the read; its completion is collected on the next pass.
    scheduler.pump_submission();
    assert_eq!(queue.cursors().read, 1);

    assert_eq!(queue.cancel_requests_with_tag(u64::MAX, 7), 0);
    let status = StatusArray::new(1, None);
    queue.enqueue_status(&status, 0).unwrap();
    queue.submit();
    scheduler.run_until_idle();

    assert_eq!(status.get_result(0), ErrorCode::Ok);
    assert_eq!(issued.to_vec(), counter_bytes(0, 4096));
}

#[test]
fn zero_mask_matches_everything_pending() {
    let file = counter_file(8192);
    let scheduler = driven(SchedulerConfig::default());
    let handle = scheduler.open_file(&file.path).unwrap();
    let queue = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::Low))
        .unwrap();
    for tag in 0..10u64 {
        queue
            .enqueue_request(
                Request::read_file(&handle, 0, 16, Destination::Buffer(DestBuffer::new(16)))
                    .with_tag(tag),
            )
            .unwrap();
    }
    assert_eq!(queue.cancel_requests_with_tag(0, 0), 10);
    queue.submit();
    let c = queue.cursors();
    assert_eq!(c.not_complete, 10);
    assert_eq!(c.read, 10);
    assert_eq!(scheduler.pump_submission().submitted, 0);
}
