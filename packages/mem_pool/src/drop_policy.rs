/// Determines what happens when an initialized [`PoolStore`][crate::PoolStore] is dropped
/// while some of its pools still contain live allocations.
///
/// By default, the store releases all of its pools when it is dropped.
///
/// # Examples
///
/// ```
/// use mem_pool::{DropPolicy, PoolStore};
///
/// // The drop policy is set at store creation time.
/// let store = PoolStore::builder()
///     .drop_policy(DropPolicy::MustNotDropPools)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The store releases every pool when it is dropped, including pools that still contain
    /// live allocations. This is the default.
    #[default]
    MayDropPools,

    /// The store panics if it is dropped while any pool still contains live allocations.
    ///
    /// This may be valuable to detect allocation leaks in tests, in the same spirit as
    /// [`PoolStore::shutdown()`][crate::PoolStore::shutdown] refusing to release pools
    /// that are still in use.
    MustNotDropPools,
}
