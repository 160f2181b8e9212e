//! Main free-list allocator implementation.
//!
//! First-fit placement over a singly-linked free list kept sorted by
//! ascending address. Carving splits the chosen block unless the remainder
//! would be too small to hold its own record; freeing reinserts the block
//! in address order and coalesces with both neighbors, so the list never
//! contains two adjacent free ranges.
//!
//! # Block layout
//! ```text
//! free:      [ FreeBlock { size, next } | ................ ]
//! allocated: [ ...padding... | AllocationHeader | payload ]
//!            ^block start                       ^user ptr
//! ```
//!
//! The padding recorded in the header walks `deallocate` back from the
//! user pointer to the block start, where the free record re-forms.

use std::alloc::Layout;
use std::fmt::Write as _;
use std::ptr::{self, NonNull};

use parking_lot::Mutex;
use tracing::debug;

use super::block::{
    read_block, read_header, write_block, write_header, AllocationHeader, FreeBlock,
    FREE_BLOCK_SIZE, HEADER_SIZE, MIN_BLOCK_SIZE, NO_BLOCK,
};
use crate::allocator::{Allocator, Introspect, MemoryUsage, Resettable};
use crate::error::{AllocError, AllocResult};
use crate::stats::AllocatorStats;
use crate::utils::{align_up, Region};

/// Largest alignment the one-byte padding field can encode.
///
/// The recorded padding is at most `HEADER_SIZE + align - 1`, which must
/// fit in a `u8`.
pub const MAX_SUPPORTED_ALIGN: usize = 128;

/// First-fit allocator over a single owned region.
///
/// `total_allocated` counts whole carved blocks (header and padding
/// included), so free bytes and allocated bytes always sum to the buffer
/// size; [`validate`](Introspect::validate) checks exactly that.
pub struct FreeListAllocator {
    inner: Mutex<FreeListInner>,
}

struct FreeListInner {
    region: Region,
    head: usize,
    stats: AllocatorStats,
    name: String,
    thread_safe: bool,
}

impl FreeListAllocator {
    /// Creates an allocator owning a fresh `capacity`-byte region.
    ///
    /// `capacity` must be at least the size of one free-block record.
    pub fn new(capacity: usize) -> AllocResult<Self> {
        if capacity < MIN_BLOCK_SIZE {
            return Err(AllocError::invalid_config(
                "buffer cannot hold a single free-block record",
            ));
        }
        let region = Region::new(capacity)?;
        let mut inner = FreeListInner {
            region,
            head: NO_BLOCK,
            stats: AllocatorStats::new(),
            name: String::from("FreeListAllocator"),
            thread_safe: false,
        };
        inner.install_initial_block();
        debug!(capacity, "created free-list allocator");
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Total capacity of the backing region in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.lock().region.len()
    }

    /// Number of blocks currently on the free list.
    pub fn free_block_count(&self) -> usize {
        self.inner.lock().free_walk().2
    }

    /// Size of the largest block on the free list in bytes.
    pub fn largest_free_block(&self) -> usize {
        self.inner.lock().free_walk().1
    }
}

impl FreeListInner {
    fn install_initial_block(&mut self) {
        // SAFETY: the region is at least MIN_BLOCK_SIZE bytes (checked at
        // construction) and holds no allocations.
        unsafe {
            write_block(
                self.region.start_addr(),
                FreeBlock {
                    size: self.region.len(),
                    next: NO_BLOCK,
                },
            );
        }
        self.head = self.region.start_addr();
    }

    fn allocate(&mut self, layout: Layout) -> AllocResult<NonNull<u8>> {
        if layout.size() == 0 {
            return Err(AllocError::invalid_layout("zero-sized allocation"));
        }
        if layout.align() > MAX_SUPPORTED_ALIGN {
            return Err(AllocError::UnsupportedAlignment {
                align: layout.align(),
                max: MAX_SUPPORTED_ALIGN,
            });
        }

        let mut prev = NO_BLOCK;
        let mut current = self.head;

        while current != NO_BLOCK {
            // SAFETY: current came from the free list, so it heads a free
            // block inside the region.
            let block = unsafe { read_block(current) };

            // The allocation header goes after the area the free record
            // occupied; the user pointer is aligned beyond it.
            let header_area = current + FREE_BLOCK_SIZE;
            let user_addr = align_up(header_area + HEADER_SIZE, layout.align());
            let padding = user_addr - header_area;
            let required = layout.size() + HEADER_SIZE + padding;

            if block.size < required {
                prev = current;
                current = block.next;
                continue;
            }

            // Split unless the remainder could not carry its own record.
            let (carved, successor) = if block.size - required <= MIN_BLOCK_SIZE {
                (block.size, block.next)
            } else {
                let rest = current + required;
                // SAFETY: rest..rest+FREE_BLOCK_SIZE lies inside the block
                // being carved, beyond the bytes handed to the caller.
                unsafe {
                    write_block(
                        rest,
                        FreeBlock {
                            size: block.size - required,
                            next: block.next,
                        },
                    );
                }
                (required, rest)
            };

            // Unlink the chosen block (or splice in the remainder).
            if prev == NO_BLOCK {
                self.head = successor;
            } else {
                // SAFETY: prev is the free block visited just before
                // current; only its link changes.
                unsafe {
                    let prev_block = read_block(prev);
                    write_block(
                        prev,
                        FreeBlock {
                            size: prev_block.size,
                            next: successor,
                        },
                    );
                }
            }

            // SAFETY: the header slot sits just below the user pointer,
            // inside the carved block.
            unsafe {
                write_header(
                    user_addr - HEADER_SIZE,
                    AllocationHeader {
                        size: carved,
                        padding: padding as u8,
                    },
                );
            }

            self.stats.record_allocation(carved);

            // SAFETY: user_addr points into the owned region, non-zero.
            return Ok(unsafe { NonNull::new_unchecked(user_addr as *mut u8) });
        }

        Err(AllocError::out_of_memory(layout.size(), layout.align()))
    }

    fn deallocate(&mut self, user_addr: usize) {
        // SAFETY: per the contract, user_addr is a live allocation, so its
        // header sits immediately below it.
        let header = unsafe { read_header(user_addr - HEADER_SIZE) };
        let block_start = user_addr - HEADER_SIZE - header.padding as usize;

        // Locate the sorted position: prev < block_start < current.
        let mut prev = NO_BLOCK;
        let mut current = self.head;
        while current != NO_BLOCK && current < block_start {
            // SAFETY: current heads a free block.
            prev = current;
            current = unsafe { read_block(current) }.next;
        }

        let mut size = header.size;
        let mut next = current;

        // Forward coalesce with the successor.
        if current != NO_BLOCK && block_start + size == current {
            // SAFETY: current heads a free block.
            let successor = unsafe { read_block(current) };
            size += successor.size;
            next = successor.next;
        }

        // SAFETY: block_start..block_start+FREE_BLOCK_SIZE is the start of
        // the range being freed; the free record re-forms there.
        unsafe { write_block(block_start, FreeBlock { size, next }) };

        // Backward coalesce with the predecessor, else just link it in.
        if prev == NO_BLOCK {
            self.head = block_start;
        } else {
            // SAFETY: prev heads a free block strictly below block_start.
            unsafe {
                let prev_block = read_block(prev);
                if prev + prev_block.size == block_start {
                    write_block(
                        prev,
                        FreeBlock {
                            size: prev_block.size + size,
                            next,
                        },
                    );
                } else {
                    write_block(
                        prev,
                        FreeBlock {
                            size: prev_block.size,
                            next: block_start,
                        },
                    );
                }
            }
        }

        self.stats.record_deallocation(header.size);
    }

    /// Payload capacity of a live allocation.
    fn allocation_size(&self, user_addr: usize) -> usize {
        // SAFETY: per the contract, user_addr is a live allocation.
        let header = unsafe { read_header(user_addr - HEADER_SIZE) };
        header.size - HEADER_SIZE - header.padding as usize
    }

    /// Walks the free list once: (total free, largest block, block count).
    fn free_walk(&self) -> (usize, usize, usize) {
        let mut total = 0;
        let mut largest = 0;
        let mut count = 0;
        let mut current = self.head;
        while current != NO_BLOCK {
            // SAFETY: current heads a free block.
            let block = unsafe { read_block(current) };
            total += block.size;
            largest = largest.max(block.size);
            count += 1;
            current = block.next;
        }
        (total, largest, count)
    }

    fn fragmentation_percent(&self) -> f32 {
        let (total, largest, _) = self.free_walk();
        if total == 0 {
            0.0
        } else {
            (1.0 - largest as f32 / total as f32) * 100.0
        }
    }

    fn validate(&self) -> bool {
        let mut total_free = 0;
        let mut current = self.head;
        while current != NO_BLOCK {
            if !self.region.contains(current) {
                return false;
            }
            // SAFETY: current was just bounds-checked; a free record is
            // expected there.
            let block = unsafe { read_block(current) };
            if block.size < MIN_BLOCK_SIZE || current + block.size > self.region.end_addr() {
                return false;
            }
            // Strict order: touching neighbors should have been coalesced.
            if block.next != NO_BLOCK && current + block.size >= block.next {
                return false;
            }
            total_free += block.size;
            current = block.next;
        }
        total_free + self.stats.allocated_bytes == self.region.len()
    }
}

// SAFETY: carved blocks are unlinked from the free list before their
// address is returned and only relinked on free, so live payload ranges
// never overlap each other or any free record.
unsafe impl Allocator for FreeListAllocator {
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

        // The carved block often has spare room from the split threshold;
        // any fit keeps the pointer stable. No shrinking in place.
        let old_payload = inner.allocation_size(old_addr);
        if old_payload >= new_layout.size() {
            return Ok(Some(old));
        }

        // On failure the old allocation stays untouched.
        let new_ptr = inner.allocate(new_layout)?;
        // SAFETY: the fresh block was just unlinked from the free list and
        // is disjoint from the still-live old block.
        unsafe { ptr::copy_nonoverlapping(old.as_ptr(), new_ptr.as_ptr(), old_payload) };
        inner.deallocate(old_addr);
        Ok(Some(new_ptr))
    }

    unsafe fn allocation_size(&self, ptr: NonNull<u8>) -> usize {
        self.inner.lock().allocation_size(ptr.as_ptr() as usize)
    }

    fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.inner.lock().region.contains(ptr.as_ptr() as usize)
    }
}

impl MemoryUsage for FreeListAllocator {
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
        self.inner.lock().fragmentation_percent()
    }
}

impl Resettable for FreeListAllocator {
    unsafe fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.install_initial_block();
        inner.stats.reset();
        debug!(name = %inner.name, "free-list allocator reset");
    }
}

impl Introspect for FreeListAllocator {
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
        let (free, largest, blocks) = inner.free_walk();
        let mut out = String::new();
        let _ = writeln!(out, "{} Stats:", inner.name);
        let _ = writeln!(out, "Total Size: {}", inner.region.len());
        let _ = writeln!(out, "Allocated: {}", inner.stats.allocated_bytes);
        let _ = writeln!(out, "Free: {}", free);
        let _ = writeln!(out, "Peak Usage: {}", inner.stats.peak_allocated_bytes);
        let _ = writeln!(out, "Allocation Count: {}", inner.stats.allocation_count);
        let _ = writeln!(out, "Free Block Count: {}", blocks);
        let _ = writeln!(out, "Largest Free Block: {}", largest);
        let _ = writeln!(out, "Fragmentation: {:.2}%", inner.fragmentation_percent());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_buffer_is_one_block_initially() {
        let alloc = FreeListAllocator::new(1024).unwrap();
        assert_eq!(alloc.free_block_count(), 1);
        assert_eq!(alloc.largest_free_block(), 1024);
        assert!(alloc.validate());
    }

    #[test]
    fn split_leaves_remainder_on_the_list() {
        let alloc = FreeListAllocator::new(1024).unwrap();
        let layout = Layout::from_size_align(100, 8).unwrap();
        let ptr = alloc.allocate(layout).unwrap();
        assert_eq!(alloc.free_block_count(), 1);
        assert!(alloc.largest_free_block() < 1024);
        assert!(alloc.validate());
        unsafe { alloc.deallocate(ptr) };
        assert_eq!(alloc.largest_free_block(), 1024);
    }

    #[test]
    fn remainder_too_small_is_absorbed() {
        let alloc = FreeListAllocator::new(256).unwrap();
        // Leave less than MIN_BLOCK_SIZE behind: the whole buffer is taken.
        let layout = Layout::from_size_align(256 - HEADER_SIZE - FREE_BLOCK_SIZE - 8, 8).unwrap();
        let ptr = alloc.allocate(layout).unwrap();
        assert_eq!(alloc.free_block_count(), 0);
        assert_eq!(alloc.total_allocated(), 256);
        unsafe {
            assert!(alloc.allocation_size(ptr) >= layout.size());
            alloc.deallocate(ptr);
        }
        assert_eq!(alloc.total_allocated(), 0);
        assert!(alloc.validate());
    }

    #[test]
    fn oversized_alignment_is_rejected() {
        let alloc = FreeListAllocator::new(4096).unwrap();
        let layout = Layout::from_size_align(8, 256).unwrap();
        assert!(matches!(
            alloc.allocate(layout),
            Err(AllocError::UnsupportedAlignment { .. })
        ));
    }
}
