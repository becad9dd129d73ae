use thiserror::Error;

/// Errors that can occur when operating a [`PoolStore`][crate::PoolStore] and its pools.
///
/// Some of these are ordinary control-flow outcomes rather than failures in the exceptional
/// sense. [`NoSuitableGap`][Self::NoSuitableGap] and [`NotEmpty`][Self::NotEmpty] in
/// particular are expected whenever a pool is close to full or still in use.
///
/// A failed operation never leaves a partially applied change behind: the pool store, the
/// pool metadata, the region ledger and the gap index are all in their pre-call state.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum AllocError {
    /// [`PoolStore::init()`][crate::PoolStore::init] was called on a store that is already
    /// initialized.
    #[error("the pool store is already initialized")]
    AlreadyInitialized,

    /// The operation requires an initialized pool store but the store has not been
    /// initialized or has already been shut down.
    #[error("the pool store is not initialized")]
    NotInitialized,

    /// The pool store could not be shut down because some pools still contain live
    /// allocations. Nothing was released.
    #[error("{open_pools} pool(s) still contain live allocations")]
    PoolsStillOpen {
        /// How many open pools hold at least one live allocation.
        open_pools: usize,
    },

    /// Backing memory for an arena or for pool bookkeeping could not be obtained.
    #[error("failed to obtain {requested} bytes of backing memory")]
    OutOfMemory {
        /// The size of the memory request that failed, in bytes.
        requested: usize,
    },

    /// No free region in the pool is large enough to satisfy the request.
    #[error("no gap of at least {requested} bytes is available")]
    NoSuitableGap {
        /// The requested allocation size, in bytes.
        requested: usize,
    },

    /// The pool cannot be closed because it is not a single free region.
    #[error("the pool still has {num_allocs} allocation(s) and {num_gaps} gap(s)")]
    NotEmpty {
        /// Number of live allocations in the pool.
        num_allocs: usize,

        /// Number of free regions in the pool.
        num_gaps: usize,
    },

    /// The allocation reference does not identify a live allocation in this pool.
    ///
    /// This is the case for references that were already freed, references that were
    /// issued by a different pool and references whose region was merged into a neighbor.
    #[error("the allocation reference does not identify a live allocation in this pool")]
    InvalidReference,

    /// An internal lookup of a free region in the gap index failed.
    ///
    /// This indicates that the bookkeeping structures of a pool disagree with each other.
    #[error("a free region is missing from the gap index")]
    NotFound,

    /// The region ledger could not grow to provide a descriptor for a split region.
    #[error("the region ledger could not grow to describe another region")]
    LedgerExhausted,

    /// The pool handle does not identify an open pool in this store.
    #[error("the pool handle does not identify an open pool")]
    UnknownPool,

    /// Zero-sized pools and zero-sized allocations are not supported.
    #[error("zero-sized pools and allocations are not supported")]
    ZeroSize,
}

/// A specialized `Result` type for memory pool operations, returning the crate's
/// [`AllocError`] type as the error value.
pub type Result<T> = std::result::Result<T, AllocError>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AllocError: Send, Sync, Debug, Copy);

    #[test]
    fn messages_name_the_numbers_involved() {
        let error = AllocError::NoSuitableGap { requested: 350 };
        assert_eq!(error.to_string(), "no gap of at least 350 bytes is available");

        let error = AllocError::NotEmpty {
            num_allocs: 1,
            num_gaps: 1,
        };
        assert_eq!(
            error.to_string(),
            "the pool still has 1 allocation(s) and 1 gap(s)"
        );

        let error = AllocError::PoolsStillOpen { open_pools: 3 };
        assert_eq!(error.to_string(), "3 pool(s) still contain live allocations");
    }

    #[test]
    fn is_usable_as_boxed_error() {
        let result: Result<()> = Err(AllocError::LedgerExhausted);

        let boxed: Box<dyn std::error::Error + Send + Sync> =
            Box::new(result.expect_err("constructed as error"));
        assert!(boxed.to_string().contains("region ledger"));
    }
}
