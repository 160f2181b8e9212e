//! Stack allocator with LIFO discipline and markers.
//!
//! ## Modules
//! - `allocator` - main [`StackAllocator`] implementation
//! - `marker` - offset snapshots for scoped rollback
//! - `frame` - RAII helper restoring a marker on drop

pub mod allocator;
pub mod frame;
pub mod marker;

pub use allocator::StackAllocator;
pub use frame::StackFrame;
pub use marker::StackMarker;
