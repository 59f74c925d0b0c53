//! Priority service split and memory-pressure ordering across queues.

use crate::support::{counter_file, RecordingBackend};
use offload_rs::{
    DestBuffer, Destination, Priority, QueueDesc, Request, Scheduler, SchedulerConfig,
};

const READ: u32 = 4096;

#[test]
fn backlogged_tiers_split_service_90_9_1() {
    let file = counter_file(1 << 20);
    let (backend, log) = RecordingBackend::with_log();
    let scheduler = Scheduler::driven(SchedulerConfig::default(), Box::new(backend));
    let handle = scheduler.open_file(&file.path).unwrap();

    let tiers = [Priority::Realtime, Priority::Normal, Priority::Low];
    let queues: Vec<_> = tiers
        .iter()
        .map(|&p| scheduler.create_queue(QueueDesc::new(0x2000, p)).unwrap())
        .collect();
    for queue in &queues {
        let dest = DestBuffer::new(READ as usize);
        for i in 0..1000u64 {
            let offset = (i % 256) * READ as u64;
            queue
                .enqueue_request(Request::read_file(
                    &handle,
                    offset,
                    READ,
                    Destination::Buffer(dest.clone()),
                ))
                .unwrap();
        }
        queue.submit();
    }
    scheduler.run_until_idle();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 3000);
    let count = |queue: usize| {
        log[..1000]
            .iter()
            .filter(|&&id| id == queues[queue].id())
            .count()
    };
    let (realtime, normal, low) = (count(0), count(1), count(2));
    assert!((895..=905).contains(&realtime), "realtime {realtime}");
    assert!((85..=95).contains(&normal), "normal {normal}");
    assert!((8..=12).contains(&low), "low {low}");
    for queue in &queues {
        assert_eq!(queue.cursors().not_complete, 1000);
    }
}

#[test]
fn queue_waiting_on_memory_keeps_its_turn() {
    let file = counter_file(64 * 1024);
    let (backend, log) = RecordingBackend::with_log();
    let scheduler = Scheduler::driven(SchedulerConfig::default(), Box::new(backend));
    scheduler.set_staging_buffer_size(4096);
    let handle = scheduler.open_file(&file.path).unwrap();

    let staged = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::Normal).with_name("staged"))
        .unwrap();
    let direct = scheduler
        .create_queue(QueueDesc::new(0x80, Priority::Normal).with_name("direct"))
        .unwrap();

    let held = scheduler.allocate_staging(4096).unwrap();
    assert!(scheduler.allocate_staging(1).is_none());

    staged
        .enqueue_request(Request::read_file(
            &handle,
            1,
            100,
            Destination::Buffer(DestBuffer::new(100)),
        ))
        .unwrap();
    direct
        .enqueue_request(Request::read_file(
            &handle,
            0,
            READ,
            Destination::Buffer(DestBuffer::new(READ as usize)),
        ))
        .unwrap();
    staged.submit();
    direct.submit();

    let report = scheduler.pump_submission();
    assert!(report.waiting_on_memory);
    assert_eq!(report.submitted, 0);
    assert!(log.lock().unwrap().is_empty());
    assert_eq!(staged.cursors().read, 0);

    drop(held);
    scheduler.run_until_idle();
    assert_eq!(*log.lock().unwrap(), vec![staged.id(), direct.id()]);
    assert_eq!(scheduler.staging_stats().in_use, 0);
}
