//! RAII-based stack frame for automatic rollback.

use super::{StackAllocator, StackMarker};

/// RAII helper for stack-scoped allocation.
///
/// Captures a marker on construction and restores the allocator to it when
/// dropped, releasing every allocation made inside the scope.
///
/// The caller must not use pointers allocated inside the frame after it is
/// dropped; the frame's lifetime is the natural way to enforce that.
pub struct StackFrame<'a> {
    allocator: &'a StackAllocator,
    marker: StackMarker,
}

impl<'a> StackFrame<'a> {
    /// Opens a frame at the allocator's current position.
    pub fn new(allocator: &'a StackAllocator) -> Self {
        let marker = allocator.marker();
        Self { allocator, marker }
    }

    /// The underlying allocator.
    pub fn allocator(&self) -> &'a StackAllocator {
        self.allocator
    }

    /// Rolls the frame back now instead of at end of scope.
    pub fn restore(self) {
        drop(self);
    }
}

impl Drop for StackFrame<'_> {
    fn drop(&mut self) {
        // SAFETY: the frame borrows the allocator for its whole life, and
        // the rollback only releases allocations made after the marker.
        unsafe { self.allocator.free_to_marker(self.marker) };
    }
}
