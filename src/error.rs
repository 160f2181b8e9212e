//! Error types for allocator operations.
//!
//! Every steady-state failure is surfaced as an [`AllocError`] value at the
//! call site; allocators never abort. The only hard failures are the
//! construction-time ones (`InvalidConfig`, `BackingAllocationFailed`),
//! which are returned from the constructors before any state exists.

use thiserror::Error;

/// Result type for allocator operations.
pub type AllocResult<T> = Result<T, AllocError>;

/// Memory allocation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The request cannot be satisfied from the remaining capacity.
    ///
    /// This is the recoverable "no address" outcome of `allocate` and
    /// `reallocate`; the allocator's state is unchanged.
    #[error("out of memory: requested {size} bytes (alignment {align})")]
    OutOfMemory {
        /// Requested payload size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// No pool bucket has a block size large enough for the request.
    #[error("no bucket can hold {size} bytes")]
    NoSuitableBucket {
        /// Requested payload size in bytes.
        size: usize,
    },

    /// The requested alignment cannot be encoded in the allocation header.
    #[error("alignment {align} exceeds the supported maximum of {max}")]
    UnsupportedAlignment {
        /// Requested alignment in bytes.
        align: usize,
        /// Largest alignment this allocator supports.
        max: usize,
    },

    /// The layout is rejected by this allocator (e.g. zero-sized).
    #[error("invalid layout: {reason}")]
    InvalidLayout {
        /// Human-readable rejection reason.
        reason: &'static str,
    },

    /// The constructor arguments describe an unusable allocator.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Human-readable rejection reason.
        reason: &'static str,
    },

    /// The backing buffer could not be acquired at construction.
    #[error("failed to acquire {size} bytes of backing memory")]
    BackingAllocationFailed {
        /// Requested buffer size in bytes.
        size: usize,
    },
}

impl AllocError {
    /// Creates an out-of-memory error for the given request.
    pub const fn out_of_memory(size: usize, align: usize) -> Self {
        Self::OutOfMemory { size, align }
    }

    /// Creates an invalid-layout error.
    pub const fn invalid_layout(reason: &'static str) -> Self {
        Self::InvalidLayout { reason }
    }

    /// Creates an invalid-configuration error.
    pub const fn invalid_config(reason: &'static str) -> Self {
        Self::InvalidConfig { reason }
    }

    /// Returns `true` for the recoverable out-of-capacity outcome.
    pub const fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}
