//! Properties of block widening and staging charges.

use proptest::prelude::*;

use offload_rs::align::{align_down, align_up, AlignedRange};
use offload_rs::StagingAllocator;

const ALIGN: u64 = 4096;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn aligned_range_is_the_smallest_block_superset(
        offset in 0u64..(1 << 40),
        len in 1u64..(1 << 24),
    ) {
        let r = AlignedRange::for_range(offset, len);
        prop_assert_eq!(r.offset % ALIGN, 0);
        prop_assert_eq!(r.len % ALIGN, 0);
        prop_assert!(r.head < ALIGN);
        prop_assert_eq!(r.offset + r.head, offset);
        prop_assert!(r.offset + r.len >= offset + len);
        // Dropping a block from either end would cut the caller range.
        prop_assert!(r.offset + r.len - ALIGN < offset + len);
        prop_assert_eq!(r.is_exact(len), offset % ALIGN == 0 && len % ALIGN == 0);
    }

    #[test]
    fn align_helpers_bracket_the_value(value in 0u64..(1 << 50), shift in 0u32..16) {
        let align = 1u64 << shift;
        let down = align_down(value, align);
        let up = align_up(value, align);
        prop_assert!(down <= value && value <= up);
        prop_assert!(up - down == 0 || up - down == align);
    }

    #[test]
    fn staging_charge_is_a_covering_power_of_two(len in 1u64..(1 << 30)) {
        let charge = StagingAllocator::charge_for(len);
        let floor = len.max(ALIGN);
        prop_assert!(charge.is_power_of_two());
        prop_assert!(charge >= floor);
        prop_assert!(charge < 2 * floor);
    }

    #[test]
    fn staging_accounting_tracks_live_buffers(
        ops in prop::collection::vec((any::<bool>(), 1usize..40_000), 1..80),
    ) {
        let capacity = 256 * 1024;
        let staging = StagingAllocator::new(capacity);
        let mut live = Vec::new();
        for (alloc, len) in ops {
            if alloc || live.is_empty() {
                let before = staging.in_use();
                match staging.allocate(len) {
                    Some(buf) => {
                        prop_assert_eq!(buf.len(), len);
                        prop_assert_eq!(staging.in_use(), before + buf.charge());
                        live.push(buf);
                    }
                    None => {
                        prop_assert!(before + StagingAllocator::charge_for(len as u64) > capacity);
                    }
                }
            } else {
                let buf = live.swap_remove(len % live.len());
                staging.free(buf);
            }
            let stats = staging.stats();
            let charged: u64 = live.iter().map(|b| b.charge()).sum();
            prop_assert_eq!(stats.in_use, charged);
            prop_assert!(stats.in_use <= capacity);
            prop_assert!(stats.high_water >= stats.in_use);
        }
        drop(live);
        prop_assert_eq!(staging.in_use(), 0);
    }
}
