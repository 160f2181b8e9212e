//! Integration tests for the pool allocator

use region_alloc::{
    AllocError, Allocator, BucketConfig, Introspect, MemoryUsage, PoolAllocator, Resettable,
};
use std::alloc::Layout;

fn two_bucket_pool() -> PoolAllocator {
    PoolAllocator::new(&[BucketConfig::new(32, 4), BucketConfig::new(128, 2)])
        .expect("Failed to create pool allocator")
}

#[test]
fn exhaustion_then_fallthrough_to_larger_bucket() {
    let allocator = two_bucket_pool();
    let layout = Layout::from_size_align(32, 8).unwrap();

    let mut slots = Vec::new();
    for i in 0..4 {
        let ptr = allocator
            .allocate(layout)
            .unwrap_or_else(|_| panic!("Allocation {i} failed"));
        slots.push(ptr.as_ptr() as usize);
    }

    // Fifth request on the same size class: bucket empty.
    let err = allocator.allocate(layout).unwrap_err();
    assert!(err.is_out_of_memory());

    // Slot addresses all sit on block boundaries of the bucket.
    let base = *slots.iter().min().unwrap();
    for addr in &slots {
        assert_eq!((addr - base) % 32, 0);
    }

    // A 64-byte request is served by the 128-byte bucket.
    let big = allocator
        .allocate(Layout::from_size_align(64, 8).unwrap())
        .expect("Fallthrough allocation failed");
    unsafe { assert_eq!(allocator.allocation_size(big), 128) };
}

#[test]
fn oversized_request_reports_bucket_miss() {
    let allocator = two_bucket_pool();
    let err = allocator
        .allocate(Layout::from_size_align(256, 8).unwrap())
        .unwrap_err();
    assert_eq!(err, AllocError::NoSuitableBucket { size: 256 });
}

#[test]
fn freed_slot_is_reused_first() {
    let allocator = two_bucket_pool();
    let layout = Layout::from_size_align(16, 8).unwrap();

    let a = allocator.allocate(layout).expect("Allocation failed");
    let _b = allocator.allocate(layout).expect("Allocation failed");

    unsafe { allocator.deallocate(a) };
    let c = allocator.allocate(layout).expect("Allocation failed");
    assert_eq!(c.as_ptr(), a.as_ptr());
}

#[test]
fn allocation_size_reports_block_size_not_request() {
    let allocator = two_bucket_pool();
    let ptr = allocator
        .allocate(Layout::from_size_align(10, 8).unwrap())
        .expect("Allocation failed");
    unsafe { assert_eq!(allocator.allocation_size(ptr), 32) };
}

#[test]
fn accounting_is_in_block_units() {
    let allocator = two_bucket_pool();
    let layout = Layout::from_size_align(10, 8).unwrap();

    assert_eq!(allocator.total_allocated(), 0);
    let ptr = allocator.allocate(layout).expect("Allocation failed");
    assert_eq!(allocator.total_allocated(), 32);
    assert_eq!(allocator.allocation_count(), 1);

    unsafe { allocator.deallocate(ptr) };
    assert_eq!(allocator.total_allocated(), 0);
    assert_eq!(allocator.allocation_count(), 0);
    assert_eq!(allocator.peak_usage(), 32);
}

#[test]
fn foreign_pointers_are_ignored_on_free() {
    let allocator = two_bucket_pool();
    let layout = Layout::from_size_align(16, 8).unwrap();
    allocator.allocate(layout).expect("Allocation failed");
    let total = allocator.total_allocated();

    let mut local = [0u8; 16];
    let foreign = std::ptr::NonNull::new(local.as_mut_ptr()).unwrap();
    assert!(!allocator.owns(foreign));
    unsafe { allocator.deallocate(foreign) };
    assert_eq!(allocator.total_allocated(), total);
}

#[test]
fn slots_are_usable_payload() {
    let allocator = two_bucket_pool();
    let layout = Layout::from_size_align(32, 8).unwrap();

    let a = allocator.allocate(layout).expect("Allocation failed");
    let b = allocator.allocate(layout).expect("Allocation failed");
    unsafe {
        std::ptr::write_bytes(a.as_ptr(), 0xAA, 32);
        std::ptr::write_bytes(b.as_ptr(), 0xBB, 32);
        assert_eq!(*a.as_ptr().add(31), 0xAA);
        assert_eq!(*b.as_ptr().add(31), 0xBB);
    }
    assert!(allocator.validate());
}

#[test]
fn reallocate_crosses_buckets_and_copies() {
    let allocator = two_bucket_pool();

    let small = allocator
        .allocate(Layout::from_size_align(32, 8).unwrap())
        .expect("Allocation failed");
    unsafe {
        for i in 0..32 {
            *small.as_ptr().add(i) = i as u8;
        }
        let big = allocator
            .reallocate(Some(small), Layout::from_size_align(64, 8).unwrap())
            .expect("Reallocation failed")
            .expect("Reallocation returned no address");
        assert_eq!(allocator.allocation_size(big), 128);
        for i in 0..32 {
            assert_eq!(*big.as_ptr().add(i), i as u8);
        }
    }
    // The 32-byte slot went back to its bucket.
    assert_eq!(allocator.free_blocks_for(32), Some(4));
}

#[test]
fn reallocate_to_zero_frees_the_slot() {
    let allocator = two_bucket_pool();
    let ptr = allocator
        .allocate(Layout::from_size_align(16, 8).unwrap())
        .expect("Allocation failed");
    let released = unsafe {
        allocator
            .reallocate(Some(ptr), Layout::from_size_align(0, 8).unwrap())
            .expect("Reallocation failed")
    };
    assert!(released.is_none());
    assert_eq!(allocator.total_allocated(), 0);
}

#[test]
fn reset_rebuilds_every_bucket() {
    let allocator = two_bucket_pool();
    let layout = Layout::from_size_align(32, 8).unwrap();

    for _ in 0..4 {
        allocator.allocate(layout).expect("Allocation failed");
    }
    assert_eq!(allocator.free_blocks_for(32), Some(0));

    unsafe { allocator.reset() };
    assert_eq!(allocator.free_blocks_for(32), Some(4));
    assert_eq!(allocator.free_blocks_for(64), Some(2));
    assert_eq!(allocator.total_allocated(), 0);
    assert_eq!(allocator.allocation_count(), 0);
    assert!(allocator.validate());
}

#[test]
fn validate_holds_through_churn() {
    let allocator = two_bucket_pool();
    let layout = Layout::from_size_align(24, 8).unwrap();

    let mut live = Vec::new();
    for round in 0..8 {
        if round % 3 == 2 {
            if let Some(ptr) = live.pop() {
                unsafe { allocator.deallocate(ptr) };
            }
        } else if let Ok(ptr) = allocator.allocate(layout) {
            live.push(ptr);
        }
        assert!(allocator.validate(), "validate failed at round {round}");
    }
}

#[test]
fn bookkeeping_surface() {
    let allocator = two_bucket_pool();
    assert_eq!(allocator.fragmentation_percent(), 0.0);
    assert_eq!(allocator.capacity(), 32 * 4 + 128 * 2);

    allocator.set_name("message-pool");
    let stats = allocator.detailed_stats();
    assert!(stats.contains("message-pool"));
    assert!(stats.contains("Bucket 0: block size 32, blocks 4, free 4"));
    assert!(stats.contains("Bucket 1: block size 128, blocks 2, free 2"));
}
