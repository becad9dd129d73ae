#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Fixed-size memory pools that hand out byte regions with first-fit or best-fit placement.
//!
//! This crate provides [`PoolStore`], a registry of memory pools. Each pool owns one arena of a
//! size fixed when the pool is opened and carves it into allocations on request. Freed
//! allocations are merged with neighboring free regions, so a pool never accumulates adjacent
//! gaps and returns to a single free region once everything in it has been freed.
//!
//! # Key Features
//!
//! - **Two placement policies**: [`Policy::FirstFit`] takes the first large enough gap in arena
//!   order, [`Policy::BestFit`] takes the smallest large enough gap
//! - **Exhaustive coalescing**: Freeing an allocation merges it with free neighbors on both sides
//! - **Opaque, checked handles**: [`PoolHandle`] and [`AllocRef`] never expose internal
//!   addresses, and stale handles are detected instead of silently aliasing new pools or
//!   allocations
//! - **All-or-nothing operations**: A failed operation leaves the pool exactly as it was
//! - **Tunable growth**: Bookkeeping grows on demand under configurable [`Growth`] rules
//! - **Introspection**: [`PoolStore::inspect()`] lists every region of a pool in arena order and
//!   [`PoolStore::pool_info()`] reports the pool metadata
//! - **Byte access**: [`PoolStore::bytes()`] and [`PoolStore::bytes_mut()`] borrow the memory
//!   of a live allocation
//!
//! # Examples
//!
//! ```rust
//! use mem_pool::{AllocError, Policy, PoolStore, Segment};
//!
//! let mut store = PoolStore::new();
//! store.init().unwrap();
//!
//! let pool = store.open_pool(1000, Policy::BestFit).unwrap();
//!
//! let small = store.allocate(pool, 100).unwrap();
//! let large = store.allocate(pool, 800).unwrap();
//!
//! // Only 100 bytes are left.
//! assert_eq!(
//!     store.allocate(pool, 200),
//!     Err(AllocError::NoSuitableGap { requested: 200 })
//! );
//!
//! // A pool cannot be closed while it still has live allocations.
//! assert!(store.close_pool(pool).is_err());
//!
//! store.free(pool, small).unwrap();
//! store.free(pool, large).unwrap();
//!
//! assert_eq!(store.inspect(pool).unwrap(), vec![Segment::new(1000, false)]);
//!
//! store.close_pool(pool).unwrap();
//! store.shutdown().unwrap();
//! ```
//!
//! # Logging
//!
//! The crate emits [`tracing`] events: store and pool lifecycle changes at the `debug` level,
//! individual allocations and frees at the `trace` level. It never installs a subscriber.

mod arena;
mod builder;
mod drop_policy;
mod error;
mod gap_index;
mod growth;
mod handles;
mod ledger;
mod policy;
mod pool;
mod segment;
mod store;

pub use builder::PoolStoreBuilder;
pub use drop_policy::*;
pub use error::*;
pub use growth::*;
pub use handles::{AllocRef, PoolHandle};
pub use policy::*;
pub use segment::*;
pub use store::PoolStore;
