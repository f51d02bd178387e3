//! Caching layer
//!
//! Time-bounded read-through cache for listings, searches and file metadata,
//! with scoped invalidation after mutations.

pub mod keys;
pub mod metadata;

pub use keys::{CacheKey, CachedValue, ListingFilter};
pub use metadata::{CacheStats, DriveCache};
