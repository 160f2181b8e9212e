//! Main pool allocator implementation.
//!
//! A set of size-class buckets, each an intrusive singly-linked free list
//! over fixed-size slots in its own region. A free slot's first bytes hold
//! the address of the next free slot; an allocated slot is payload through
//! and through.
//!
//! # Memory layout (one bucket)
//! ```text
//! [slot 0][slot 1][slot 2]...[slot N-1]
//!    |       ^ free_head ------+
//!    +---- next ----------^
//! ```

use std::alloc::Layout;
use std::fmt::Write as _;
use std::mem::size_of;
use std::ptr::{self, NonNull};

use parking_lot::Mutex;
use tracing::debug;

use super::BucketConfig;
use crate::allocator::{Allocator, Introspect, MemoryUsage, Resettable};
use crate::error::{AllocError, AllocResult};
use crate::stats::AllocatorStats;
use crate::utils::Region;

/// Address of the next free slot; `NO_SLOT` terminates the list.
///
/// Region addresses are never zero, so zero is a safe terminator.
const NO_SLOT: usize = 0;

/// Reads a free slot's link to the next free slot.
///
/// # Safety
///
/// `addr` must be the start of a free slot inside one of this allocator's
/// buckets.
#[inline]
unsafe fn read_next(addr: usize) -> usize {
    // Slots of odd block sizes can start at any byte offset.
    unsafe { ptr::read_unaligned(addr as *const usize) }
}

/// Writes a free slot's link to the next free slot.
///
/// # Safety
///
/// `addr` must be the start of a slot inside one of this allocator's
/// buckets, and the slot must not be a live allocation.
#[inline]
unsafe fn write_next(addr: usize, next: usize) {
    unsafe { ptr::write_unaligned(addr as *mut usize, next) };
}

/// One size class: a region divided into equally sized slots.
#[derive(Debug)]
struct Bucket {
    region: Region,
    block_size: usize,
    block_count: usize,
    free_head: usize,
    free_count: usize,
}

impl Bucket {
    fn new(config: BucketConfig) -> AllocResult<Self> {
        if config.block_size < size_of::<usize>() {
            return Err(AllocError::invalid_config(
                "bucket block size cannot hold a free-list link",
            ));
        }
        if config.block_count == 0 {
            return Err(AllocError::invalid_config("bucket cannot have zero blocks"));
        }
        let total = config
            .block_size
            .checked_mul(config.block_count)
            .ok_or(AllocError::invalid_config("bucket size overflows"))?;

        let mut bucket = Self {
            region: Region::new(total)?,
            block_size: config.block_size,
            block_count: config.block_count,
            free_head: NO_SLOT,
            free_count: 0,
        };
        bucket.thread_free_list();
        Ok(bucket)
    }

    /// Threads every slot onto the free list in address order, so the head
    /// ends up at the last slot. The order is an implementation detail but
    /// stays stable for reproducibility.
    fn thread_free_list(&mut self) {
        let mut head = NO_SLOT;
        for i in 0..self.block_count {
            let slot = self.region.start_addr() + i * self.block_size;
            // SAFETY: slot starts inside the owned region and holds no
            // live allocation while the list is being (re)built.
            unsafe { write_next(slot, head) };
            head = slot;
        }
        self.free_head = head;
        self.free_count = self.block_count;
    }

    fn contains(&self, addr: usize) -> bool {
        self.region.contains(addr)
    }

    fn pop(&mut self) -> Option<usize> {
        if self.free_head == NO_SLOT {
            return None;
        }
        let slot = self.free_head;
        // SAFETY: slot came off the free list, so it is free and in-range.
        self.free_head = unsafe { read_next(slot) };
        self.free_count -= 1;
        Some(slot)
    }

    fn push(&mut self, addr: usize) {
        // SAFETY: caller verified addr lies in this bucket; the slot is
        // being returned, so overwriting its first bytes is fine.
        unsafe { write_next(addr, self.free_head) };
        self.free_head = addr;
        self.free_count += 1;
    }
}

/// Pool allocator over an ordered set of size-class buckets.
///
/// Each bucket owns its own backing region; buckets never share storage.
/// `allocation_size` reports the owning bucket's block size, not the
/// originally requested size (the request is not stored anywhere).
#[derive(Debug)]
pub struct PoolAllocator {
    inner: Mutex<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    buckets: Vec<Bucket>,
    stats: AllocatorStats,
    name: String,
    thread_safe: bool,
}

impl PoolAllocator {
    /// Creates a pool from an ordered list of bucket descriptions.
    ///
    /// Each bucket needs `block_size >= size_of::<usize>()` so free slots
    /// can carry their intrusive link, and at least one block.
    pub fn new(configs: &[BucketConfig]) -> AllocResult<Self> {
        if configs.is_empty() {
            return Err(AllocError::invalid_config("pool needs at least one bucket"));
        }
        let buckets = configs
            .iter()
            .map(|&config| Bucket::new(config))
            .collect::<AllocResult<Vec<_>>>()?;
        debug!(buckets = buckets.len(), "created pool allocator");
        Ok(Self {
            inner: Mutex::new(PoolInner {
                buckets,
                stats: AllocatorStats::new(),
                name: String::from("PoolAllocator"),
                thread_safe: false,
            }),
        })
    }

    /// Total capacity across all buckets in bytes.
    pub fn capacity(&self) -> usize {
        self.inner
            .lock()
            .buckets
            .iter()
            .map(|b| b.region.len())
            .sum()
    }

    /// Free blocks remaining in the first bucket whose block size covers
    /// `size`, or `None` if no bucket does.
    pub fn free_blocks_for(&self, size: usize) -> Option<usize> {
        self.inner
            .lock()
            .buckets
            .iter()
            .find(|b| b.block_size >= size)
            .map(|b| b.free_count)
    }
}

impl PoolInner {
    fn bucket_of(&self, addr: usize) -> Option<usize> {
        self.buckets.iter().position(|b| b.contains(addr))
    }

    fn allocate(&mut self, layout: Layout) -> AllocResult<NonNull<u8>> {
        if layout.size() == 0 {
            return Err(AllocError::invalid_layout("zero-sized allocation"));
        }

        // First bucket whose block size covers the request. The alignment
        // argument is not enforced: callers pick a pool whose block size is
        // a power-of-two multiple of the alignment they need.
        let bucket = self
            .buckets
            .iter_mut()
            .find(|b| b.block_size >= layout.size())
            .ok_or(AllocError::NoSuitableBucket {
                size: layout.size(),
            })?;

        let block_size = bucket.block_size;
        let slot = bucket
            .pop()
            .ok_or(AllocError::out_of_memory(layout.size(), layout.align()))?;
        self.stats.record_allocation(block_size);

        // SAFETY: slot points into the bucket's owned region, non-zero.
        Ok(unsafe { NonNull::new_unchecked(slot as *mut u8) })
    }

    fn deallocate(&mut self, addr: usize) {
        // Pointers owned by no bucket are ignored.
        if let Some(index) = self.bucket_of(addr) {
            let block_size = self.buckets[index].block_size;
            self.buckets[index].push(addr);
            self.stats.record_deallocation(block_size);
        }
    }

    fn allocation_size(&self, addr: usize) -> usize {
        self.bucket_of(addr)
            .map(|index| self.buckets[index].block_size)
            .unwrap_or(0)
    }

    fn validate(&self) -> bool {
        let mut live_bytes = 0;
        for bucket in &self.buckets {
            let mut seen = 0;
            let mut slot = bucket.free_head;
            while slot != NO_SLOT {
                // A corrupt link could cycle; the slot count bounds the walk.
                if seen >= bucket.block_count {
                    return false;
                }
                if !bucket.contains(slot) {
                    return false;
                }
                if (slot - bucket.region.start_addr()) % bucket.block_size != 0 {
                    return false;
                }
                seen += 1;
                // SAFETY: slot was just verified to be a slot boundary
                // inside the bucket, and it is on the free list.
                slot = unsafe { read_next(slot) };
            }
            if seen != bucket.free_count {
                return false;
            }
            live_bytes += (bucket.block_count - bucket.free_count) * bucket.block_size;
        }
        live_bytes == self.stats.allocated_bytes
    }
}

// SAFETY: slots are carved on fixed boundaries of bucket-owned regions;
// a slot leaves the free list when handed out and only returns on free, so
// live slots never overlap.
unsafe impl Allocator for PoolAllocator {
    fn allocate(&self, layout: Layout) -> AllocResult<NonNull<u8>> {
        self.inner.lock().allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        self.inner.lock().deallocate(ptr.as_ptr() as usize);
    }

    unsafe fn reallocate(
        &self,
        ptr: Option<NonNull<u8>>,
        new_layout: Layout,
    ) -> AllocResult<Option<NonNull<u8>>> {
        let mut inner = self.inner.lock();

        let Some(old) = ptr else {
            return inner.allocate(new_layout).map(Some);
        };
        let old_addr = old.as_ptr() as usize;
        if new_layout.size() == 0 {
            inner.deallocate(old_addr);
            return Ok(None);
        }

        let old_size = inner.allocation_size(old_addr);
        let new_ptr = inner.allocate(new_layout)?;

        let copy_len = old_size.min(new_layout.size());
        if copy_len > 0 {
            // SAFETY: the fresh slot is distinct from the still-live old
            // slot, so the ranges cannot overlap.
            unsafe { ptr::copy_nonoverlapping(old.as_ptr(), new_ptr.as_ptr(), copy_len) };
        }
        inner.deallocate(old_addr);
        Ok(Some(new_ptr))
    }

    unsafe fn allocation_size(&self, ptr: NonNull<u8>) -> usize {
        self.inner.lock().allocation_size(ptr.as_ptr() as usize)
    }

    fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.inner.lock().bucket_of(ptr.as_ptr() as usize).is_some()
    }
}

impl MemoryUsage for PoolAllocator {
    fn total_allocated(&self) -> usize {
        self.inner.lock().stats.allocated_bytes
    }

    fn peak_usage(&self) -> usize {
        self.inner.lock().stats.peak_allocated_bytes
    }

    fn allocation_count(&self) -> usize {
        self.inner.lock().stats.allocation_count
    }

    fn fragmentation_percent(&self) -> f32 {
        // Fixed-size slots cannot fragment.
        0.0
    }
}

impl Resettable for PoolAllocator {
    unsafe fn reset(&self) {
        let mut inner = self.inner.lock();
        for bucket in &mut inner.buckets {
            bucket.thread_free_list();
        }
        inner.stats.reset();
        debug!(name = %inner.name, "pool allocator reset");
    }
}

impl Introspect for PoolAllocator {
    fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    fn set_name(&self, name: &str) {
        self.inner.lock().name = name.to_owned();
    }

    fn set_thread_safe(&self, thread_safe: bool) {
        self.inner.lock().thread_safe = thread_safe;
    }

    fn is_thread_safe(&self) -> bool {
        self.inner.lock().thread_safe
    }

    fn validate(&self) -> bool {
        self.inner.lock().validate()
    }

    fn detailed_stats(&self) -> String {
        let inner = self.inner.lock();
        let total: usize = inner.buckets.iter().map(|b| b.region.len()).sum();
        let mut out = String::new();
        let _ = writeln!(out, "{} Stats:", inner.name);
        let _ = writeln!(out, "Total Size: {}", total);
        let _ = writeln!(out, "Allocated: {}", inner.stats.allocated_bytes);
        let _ = writeln!(out, "Free: {}", total - inner.stats.allocated_bytes);
        let _ = writeln!(out, "Peak Usage: {}", inner.stats.peak_allocated_bytes);
        let _ = writeln!(out, "Allocation Count: {}", inner.stats.allocation_count);
        for (i, bucket) in inner.buckets.iter().enumerate() {
            let _ = writeln!(
                out,
                "Bucket {}: block size {}, blocks {}, free {}",
                i, bucket.block_size, bucket.block_count, bucket.free_count
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_list_head_starts_at_last_slot() {
        let alloc = PoolAllocator::new(&[BucketConfig::new(32, 4)]).unwrap();
        let layout = Layout::from_size_align(32, 8).unwrap();
        let first = alloc.allocate(layout).unwrap();
        let second = alloc.allocate(layout).unwrap();
        // Slots come back in descending address order.
        assert_eq!(
            first.as_ptr() as usize,
            second.as_ptr() as usize + 32
        );
    }

    #[test]
    fn undersized_blocks_are_rejected() {
        let err = PoolAllocator::new(&[BucketConfig::new(4, 8)]).unwrap_err();
        assert!(matches!(err, AllocError::InvalidConfig { .. }));
    }
}
