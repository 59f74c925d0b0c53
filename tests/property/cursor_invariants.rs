//! Random operation sequences never break the queue cursor ordering, and a
//! drained queue holds no staging memory.

use proptest::prelude::*;

use offload_rs::{
    DestBuffer, Destination, Fence, InlineBackend, Priority, QueueDesc, Request, Scheduler,
    SchedulerConfig, StatusArray,
};
use std::io::Write;

const FILE_LEN: u64 = 256 * 1024;
const CAPACITY: u16 = 0x80;

#[derive(Clone, Debug)]
enum Op {
    Read { offset: u64, len: u32, tag: u64 },
    Status,
    Signal,
    Submit,
    Cancel { mask: u64, value: u64 },
    PumpSubmission,
    PumpDecompression,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u64..FILE_LEN + 4096, 1u32..20_000, 0u64..4)
            .prop_map(|(offset, len, tag)| Op::Read { offset, len, tag }),
        1 => Just(Op::Status),
        1 => Just(Op::Signal),
        2 => Just(Op::Submit),
        1 => (0u64..4, 0u64..4).prop_map(|(mask, value)| Op::Cancel { mask, value }),
        2 => Just(Op::PumpSubmission),
        1 => Just(Op::PumpDecompression),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn cursors_stay_ordered_under_random_ops(
        ops in prop::collection::vec(op_strategy(), 1..200),
        staging_kib in 8u64..256,
    ) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let bytes: Vec<u8> = (0..FILE_LEN).map(|i| (i % 253) as u8).collect();
        std::fs::File::create(&path).unwrap().write_all(&bytes).unwrap();

        let scheduler = Scheduler::driven(
            SchedulerConfig {
                staging_bytes: staging_kib * 1024,
                max_in_flight: 4,
                ..SchedulerConfig::default()
            },
            Box::new(InlineBackend::new()),
        );
        let handle = scheduler.open_file(&path).unwrap();
        let queue = scheduler.create_queue(QueueDesc::new(CAPACITY, Priority::Normal)).unwrap();
        let statuses = StatusArray::new(ops.len() as u32, None);
        let fence = Fence::new(None);
        let mut next_status = 0u32;
        let mut fence_value = 0u64;

        for op in ops {
            let full = queue.query().empty_slots == 0;
            match op {
                Op::Read { .. } | Op::Status | Op::Signal if full => {}
                Op::Read { offset, len, tag } => {
                    let dest = Destination::Buffer(DestBuffer::new(len as usize));
                    queue
                        .enqueue_request(Request::read_file(&handle, offset, len, dest).with_tag(tag))
                        .unwrap();
                }
                Op::Status => {
                    queue.enqueue_status(&statuses, next_status).unwrap();
                    next_status += 1;
                }
                Op::Signal => {
                    fence_value += 1;
                    queue.enqueue_signal(&fence, fence_value).unwrap();
                }
                Op::Submit => queue.submit(),
                Op::Cancel { mask, value } => {
                    queue.cancel_requests_with_tag(mask, value);
                }
                Op::PumpSubmission => {
                    scheduler.pump_submission();
                }
                Op::PumpDecompression => {
                    scheduler.pump_decompression();
                }
            }
            let c = queue.cursors();
            prop_assert!(c.is_consistent(CAPACITY as u64), "{:?}", c);
            prop_assert!(scheduler.staging_stats().in_use <= staging_kib * 1024);
        }

        queue.submit();
        scheduler.run_until_idle();
        let c = queue.cursors();
        prop_assert_eq!(c.not_complete, c.enqueued);
        prop_assert_eq!(c.read, c.enqueued);
        prop_assert_eq!(scheduler.staging_stats().in_use, 0);
        prop_assert_eq!(fence.completed_value(), fence_value);
        for index in 0..next_status {
            prop_assert!(statuses.is_complete(index));
        }
    }
}
