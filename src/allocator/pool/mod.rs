//! Pool allocator with segregated fixed-size buckets.
//!
//! ## Modules
//! - `allocator` - main [`PoolAllocator`] implementation
//! - `config` - bucket size-class descriptions

pub mod allocator;
pub mod config;

pub use allocator::PoolAllocator;
pub use config::BucketConfig;
