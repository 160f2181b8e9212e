//! Intrusive on-buffer records and their raw accessors.
//!
//! Free ranges and allocation headers live inside the backing buffer
//! itself. These four accessors are the only place the free-list allocator
//! touches raw memory; everything above them is address arithmetic.

use std::mem::size_of;
use std::ptr;

/// Metadata overlaid on the first bytes of every free range.
///
/// `next` is the absolute address of the successor block in the
/// address-sorted free list, or [`NO_BLOCK`] at the tail.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(super) struct FreeBlock {
    pub size: usize,
    pub next: usize,
}

/// Per-allocation metadata recovered from the user pointer on free.
///
/// `size` is the total carved block size (header, padding and payload);
/// `padding` is the distance from the end of the block's free-record area
/// to the user pointer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(super) struct AllocationHeader {
    pub size: usize,
    pub padding: u8,
}

/// List terminator; region addresses are never zero.
pub(super) const NO_BLOCK: usize = 0;

pub(super) const FREE_BLOCK_SIZE: usize = size_of::<FreeBlock>();
pub(super) const HEADER_SIZE: usize = size_of::<AllocationHeader>();

/// Smallest byte range that can carry its own free-block record.
pub(super) const MIN_BLOCK_SIZE: usize = FREE_BLOCK_SIZE;

// deallocate() reconstructs a block start as user - HEADER_SIZE - padding,
// which lands on the block's first byte only while the two records occupy
// the same number of bytes.
const _: () = assert!(FREE_BLOCK_SIZE == HEADER_SIZE);

// Blocks and headers sit at arbitrary byte offsets inside the buffer, so
// every access below is unaligned.

/// Reads the free-block record at `addr`.
///
/// # Safety
///
/// `addr..addr + FREE_BLOCK_SIZE` must lie inside the owned region and
/// currently hold a free-block record.
#[inline]
pub(super) unsafe fn read_block(addr: usize) -> FreeBlock {
    unsafe { ptr::read_unaligned(addr as *const FreeBlock) }
}

/// Writes a free-block record at `addr`.
///
/// # Safety
///
/// `addr..addr + FREE_BLOCK_SIZE` must lie inside the owned region and
/// must not overlap any live payload.
#[inline]
pub(super) unsafe fn write_block(addr: usize, block: FreeBlock) {
    unsafe { ptr::write_unaligned(addr as *mut FreeBlock, block) };
}

/// Reads the allocation header at `addr`.
///
/// # Safety
///
/// `addr..addr + HEADER_SIZE` must lie inside the owned region and hold a
/// header previously written by [`write_header`].
#[inline]
pub(super) unsafe fn read_header(addr: usize) -> AllocationHeader {
    unsafe { ptr::read_unaligned(addr as *const AllocationHeader) }
}

/// Writes an allocation header at `addr`.
///
/// # Safety
///
/// `addr..addr + HEADER_SIZE` must lie inside the owned region, within the
/// block being carved for this allocation.
#[inline]
pub(super) unsafe fn write_header(addr: usize, header: AllocationHeader) {
    unsafe { ptr::write_unaligned(addr as *mut AllocationHeader, header) };
}
