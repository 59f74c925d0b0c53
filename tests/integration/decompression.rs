//! zlib requests from files and from memory.

use crate::support::{bytes_file, counter_bytes, driven, threaded, wait_status, zlib};
use offload_rs::{
    Decompression, DestBuffer, Destination, ErrorCode, PageArray, Priority, QueueDesc, Request,
    SchedulerConfig, StatusArray,
};
use std::sync::Arc;

#[test]
fn file_zlib_inflates_directly_into_buffer() {
    let plain = counter_bytes(0, 200_000);
    let packed = zlib(&plain);
    // Put the stream at an unaligned offset behind some padding.
    let mut contents = vec![0xAAu8; 777];
    contents.extend_from_slice(&packed);
    let file = bytes_file(&contents);

    let scheduler = driven(SchedulerConfig::default());
    let handle = scheduler.open_file(&file.path).unwrap();
    let queue = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::Normal))
        .unwrap();
    let dest = DestBuffer::new(plain.len());
    queue
        .enqueue_request(Request::read_file_zlib(
            &handle,
            777,
            packed.len() as u32,
            Destination::Buffer(dest.clone()),
            plain.len() as u32,
        ))
        .unwrap();
    let status = StatusArray::new(1, None);
    queue.enqueue_status(&status, 0).unwrap();
    queue.submit();
    scheduler.run_until_idle();

    assert_eq!(status.get_result(0), ErrorCode::Ok);
    assert_eq!(dest.to_vec(), plain);
    assert_eq!(scheduler.staging_stats().in_use, 0);
}

#[test]
fn intermediate_buffer_feeds_page_destination() {
    let plain = counter_bytes(4096, 90_000);
    let packed = zlib(&plain);
    let file = bytes_file(&packed);

    let scheduler = driven(SchedulerConfig::default());
    let handle = scheduler.open_file(&file.path).unwrap();
    let queue = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::High))
        .unwrap();
    let pages = PageArray::new(2);
    queue
        .enqueue_request(
            Request::read_file_zlib(
                &handle,
                0,
                packed.len() as u32,
                Destination::Pages {
                    pages: pages.clone(),
                    offset: 512,
                },
                plain.len() as u32,
            )
            .with_intermediate(plain.len() as u32),
        )
        .unwrap();
    let status = StatusArray::new(1, None);
    queue.enqueue_status(&status, 0).unwrap();
    queue.submit();
    scheduler.run_until_idle();

    assert_eq!(status.get_result(0), ErrorCode::Ok);
    assert_eq!(pages.read(512, plain.len()), plain);
}

#[test]
fn memory_requests_skip_the_read_stage() {
    let plain = counter_bytes(0, 64 * 1024);
    let packed: Arc<[u8]> = zlib(&plain).into();
    let scheduler = threaded();
    let queue = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::Realtime).with_name("memory"))
        .unwrap();

    let inflated = DestBuffer::new(plain.len());
    let copied = DestBuffer::new(100);
    queue
        .enqueue_request(Request::from_memory(
            Arc::clone(&packed),
            Destination::Buffer(inflated.clone()),
            plain.len() as u32,
            Decompression::Zlib {
                intermediate_size: 0,
            },
        ))
        .unwrap();
    let raw: Arc<[u8]> = plain[..100].to_vec().into();
    queue
        .enqueue_request(Request::from_memory(
            raw,
            Destination::Buffer(copied.clone()),
            100,
            Decompression::None,
        ))
        .unwrap();
    let status = StatusArray::new(1, None);
    queue.enqueue_status(&status, 0).unwrap();
    queue.submit();

    assert_eq!(wait_status(&status, 0), ErrorCode::Ok);
    assert_eq!(inflated.to_vec(), plain);
    assert_eq!(copied.to_vec(), &plain[..100]);
}

#[test]
fn corrupt_stream_fails_with_decompression_error() {
    let mut packed = zlib(&counter_bytes(0, 10_000));
    let mid = packed.len() / 2;
    for b in &mut packed[mid..mid + 16] {
        *b ^= 0x5A;
    }
    let scheduler = driven(SchedulerConfig::default());
    let queue = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::Normal))
        .unwrap();
    queue
        .enqueue_request(
            Request::from_memory(
                packed.into(),
                Destination::Buffer(DestBuffer::new(10_000)),
                10_000,
                Decompression::Zlib {
                    intermediate_size: 0,
                },
            )
            .with_name("corrupt"),
        )
        .unwrap();
    let status = StatusArray::new(1, None);
    queue.enqueue_status(&status, 0).unwrap();
    queue.submit();
    scheduler.run_until_idle();

    assert_eq!(status.get_result(0), ErrorCode::Decompression);
    let record = queue.retrieve_error_record();
    assert_eq!(record.failure_count, 1);
    let first = record.first_failure.unwrap();
    assert_eq!(first.code, ErrorCode::Decompression);
    assert_eq!(first.name.as_deref(), Some("corrupt"));
    assert_eq!(first.filename, None);
}

#[test]
fn inflated_length_must_match_dest_size() {
    let plain = counter_bytes(0, 5000);
    let packed: Arc<[u8]> = zlib(&plain).into();
    let scheduler = driven(SchedulerConfig::default());
    let queue = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::Normal))
        .unwrap();
    let status = StatusArray::new(2, None);

    // Claims more output than the stream holds.
    queue
        .enqueue_request(Request::from_memory(
            Arc::clone(&packed),
            Destination::Buffer(DestBuffer::new(6000)),
            6000,
            Decompression::Zlib {
                intermediate_size: 0,
            },
        ))
        .unwrap();
    queue.enqueue_status(&status, 0).unwrap();
    // Claims less.
    queue
        .enqueue_request(Request::from_memory(
            packed,
            Destination::Buffer(DestBuffer::new(4000)),
            4000,
            Decompression::Zlib {
                intermediate_size: 0,
            },
        ))
        .unwrap();
    queue.enqueue_status(&status, 1).unwrap();
    queue.submit();
    scheduler.run_until_idle();

    assert_eq!(status.get_result(0), ErrorCode::Decompression);
    assert_eq!(status.get_result(1), ErrorCode::Decompression);
    assert_eq!(queue.retrieve_error_record().failure_count, 2);
}
