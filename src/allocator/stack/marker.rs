//! Offset snapshots for scoped rollback.

/// Snapshot of a stack allocator's bump offset.
///
/// Obtained from [`StackAllocator::marker`](super::StackAllocator::marker)
/// and consumed by
/// [`free_to_marker`](super::StackAllocator::free_to_marker), which rolls
/// every allocation made since the snapshot back in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackMarker {
    pub(super) offset: usize,
}

impl StackMarker {
    /// The recorded bump offset in bytes from the start of the region.
    pub fn offset(&self) -> usize {
        self.offset
    }
}
