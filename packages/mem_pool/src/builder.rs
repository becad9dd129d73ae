use crate::{DropPolicy, Growth, PoolStore};

/// Builder for creating an instance of [`PoolStore`].
///
/// You only need to use this builder if you want to customize the store configuration.
/// The default configuration used by [`PoolStore::new()`][1] is sufficient for most use cases.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use mem_pool::{DropPolicy, Growth, PoolStore};
///
/// let store = PoolStore::builder()
///     .gap_index_growth(Growth::new(
///         NonZero::new(128).unwrap(),
///         0.9,
///         NonZero::new(2).unwrap(),
///     ))
///     .drop_policy(DropPolicy::MustNotDropPools)
///     .build();
/// ```
///
/// [1]: PoolStore::new
#[derive(Debug)]
#[must_use]
pub struct PoolStoreBuilder {
    store_growth: Growth,
    ledger_growth: Growth,
    gap_index_growth: Growth,
    drop_policy: DropPolicy,
}

impl PoolStoreBuilder {
    pub(crate) fn new() -> Self {
        Self {
            store_growth: Growth::store_default(),
            ledger_growth: Growth::ledger_default(),
            gap_index_growth: Growth::gap_index_default(),
            drop_policy: DropPolicy::default(),
        }
    }

    /// Sets the growth rules of the registry that holds the open pools.
    pub fn store_growth(mut self, growth: Growth) -> Self {
        self.store_growth = growth;
        self
    }

    /// Sets the growth rules of the region ledger of every pool opened by the store.
    pub fn ledger_growth(mut self, growth: Growth) -> Self {
        self.ledger_growth = growth;
        self
    }

    /// Sets the growth rules of the gap index of every pool opened by the store.
    pub fn gap_index_growth(mut self, growth: Growth) -> Self {
        self.gap_index_growth = growth;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the store. This governs how
    /// to treat pools with live allocations when the store is dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use mem_pool::{DropPolicy, PoolStore};
    ///
    /// let store = PoolStore::builder()
    ///     .drop_policy(DropPolicy::MustNotDropPools)
    ///     .build();
    /// ```
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the store with the specified configuration.
    ///
    /// The store starts out uninitialized; call [`PoolStore::init()`] before opening pools.
    ///
    /// # Examples
    ///
    /// ```
    /// use mem_pool::PoolStore;
    ///
    /// let store = PoolStore::builder().build();
    /// assert!(!store.is_initialized());
    /// ```
    #[must_use]
    pub fn build(self) -> PoolStore {
        PoolStore::new_inner(StoreConfig {
            store_growth: self.store_growth,
            ledger_growth: self.ledger_growth,
            gap_index_growth: self.gap_index_growth,
            drop_policy: self.drop_policy,
        })
    }
}

/// The settings a [`PoolStore`] is built with.
#[derive(Clone, Copy, Debug)]
pub(crate) struct StoreConfig {
    pub(crate) store_growth: Growth,
    pub(crate) ledger_growth: Growth,
    pub(crate) gap_index_growth: Growth,
    pub(crate) drop_policy: DropPolicy,
}
