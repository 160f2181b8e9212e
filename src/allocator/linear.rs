//! Monotonic bump allocator.
//!
//! The simplest placement policy: a single offset advances through the
//! region and never moves backwards. Individual deallocation is a no-op;
//! the whole buffer is reclaimed at once by [`reset`](Resettable::reset).
//!
//! # Memory layout
//! ```text
//! [start]--[alloc 1]--[alloc 2]--[alloc 3]--[offset]----free----[end]
//!          <-------- allocated -------->    <----- available ----->
//! ```

use std::alloc::Layout;
use std::fmt::Write as _;
use std::ptr::{self, NonNull};

use parking_lot::Mutex;
use tracing::debug;

use crate::allocator::{Allocator, Introspect, MemoryUsage, Resettable};
use crate::error::{AllocError, AllocResult};
use crate::stats::AllocatorStats;
use crate::utils::{align_up, Region};

/// Bump allocator over a single owned region.
///
/// `total_allocated` reports the current offset, so it includes alignment
/// padding and does not shrink on `deallocate`.
pub struct LinearAllocator {
    inner: Mutex<LinearInner>,
}

struct LinearInner {
    region: Region,
    offset: usize,
    stats: AllocatorStats,
    name: String,
    thread_safe: bool,
}

impl LinearAllocator {
    /// Creates an allocator owning a fresh `capacity`-byte region.
    pub fn new(capacity: usize) -> AllocResult<Self> {
        let region = Region::new(capacity)?;
        debug!(capacity, "created linear allocator");
        Ok(Self {
            inner: Mutex::new(LinearInner {
                region,
                offset: 0,
                stats: AllocatorStats::new(),
                name: String::from("LinearAllocator"),
                thread_safe: false,
            }),
        })
    }

    /// Total capacity of the backing region in bytes.
    pub fn capacity(&self) -> usize {
        self.inner.lock().region.len()
    }

    /// Bytes consumed so far, padding included.
    pub fn used(&self) -> usize {
        self.inner.lock().offset
    }

    /// Bytes still available at the top of the region.
    pub fn available(&self) -> usize {
        let inner = self.inner.lock();
        inner.region.len() - inner.offset
    }
}

impl LinearInner {
    fn allocate(&mut self, layout: Layout) -> AllocResult<NonNull<u8>> {
        if layout.size() == 0 {
            return Err(AllocError::invalid_layout("zero-sized allocation"));
        }

        // Align the absolute address: the region base only promises its
        // own base alignment.
        let base = self.region.start_addr();
        let addr = align_up(base + self.offset, layout.align());
        let new_offset = match addr.checked_add(layout.size()) {
            Some(end) if end <= self.region.end_addr() => end - base,
            _ => return Err(AllocError::out_of_memory(layout.size(), layout.align())),
        };

        self.offset = new_offset;
        self.stats.allocation_count += 1;
        self.stats.set_allocated(self.offset);

        // SAFETY: addr points into the owned region and is non-zero.
        Ok(unsafe { NonNull::new_unchecked(addr as *mut u8) })
    }

    /// Distance from `addr` to the current top.
    ///
    /// Bump allocations carry no headers, so this is the only computable
    /// size. It over-reports for any allocation other than the most recent
    /// one, which is harmless because bump allocations never move.
    fn allocation_size(&self, addr: usize) -> usize {
        let top = self.region.start_addr() + self.offset;
        if addr >= self.region.start_addr() && addr < top {
            top - addr
        } else {
            0
        }
    }
}

// SAFETY: every returned pointer is carved from the owned region at an
// aligned offset at or above all previous allocations, so live ranges
// never overlap.
unsafe impl Allocator for LinearAllocator {
    fn allocate(&self, layout: Layout) -> AllocResult<NonNull<u8>> {
        self.inner.lock().allocate(layout)
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>) {
        // Bump allocations are reclaimed wholesale by reset.
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
        if new_layout.size() == 0 {
            // Freeing is a no-op here; the old range is simply abandoned.
            return Ok(None);
        }

        let old_size = inner.allocation_size(old.as_ptr() as usize);
        let new_ptr = inner.allocate(new_layout)?;

        let copy_len = old_size.min(new_layout.size());
        if copy_len > 0 {
            // SAFETY: the fresh block starts at or above the previous top,
            // so the two ranges are disjoint and both lie in the region.
            unsafe { ptr::copy_nonoverlapping(old.as_ptr(), new_ptr.as_ptr(), copy_len) };
        }
        Ok(Some(new_ptr))
    }

    unsafe fn allocation_size(&self, ptr: NonNull<u8>) -> usize {
        self.inner.lock().allocation_size(ptr.as_ptr() as usize)
    }

    fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.inner.lock().region.contains(ptr.as_ptr() as usize)
    }
}

impl MemoryUsage for LinearAllocator {
    fn total_allocated(&self) -> usize {
        self.inner.lock().offset
    }

    fn peak_usage(&self) -> usize {
        self.inner.lock().stats.peak_allocated_bytes
    }

    fn allocation_count(&self) -> usize {
        self.inner.lock().stats.allocation_count
    }

    fn fragmentation_percent(&self) -> f32 {
        // Free space is a single contiguous run at the top.
        0.0
    }
}

impl Resettable for LinearAllocator {
    unsafe fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.offset = 0;
        inner.stats.reset();
        debug!(name = %inner.name, "linear allocator reset");
    }
}

impl Introspect for LinearAllocator {
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
        let inner = self.inner.lock();
        inner.offset <= inner.region.len()
    }

    fn detailed_stats(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::new();
        let _ = writeln!(out, "{} Stats:", inner.name);
        let _ = writeln!(out, "Total Size: {}", inner.region.len());
        let _ = writeln!(out, "Used: {}", inner.offset);
        let _ = writeln!(out, "Free: {}", inner.region.len() - inner.offset);
        let _ = writeln!(out, "Peak Usage: {}", inner.stats.peak_allocated_bytes);
        let _ = writeln!(out, "Allocation Count: {}", inner.stats.allocation_count);
        out
    }
}
