/// Identifies an open pool in a [`PoolStore`][crate::PoolStore].
///
/// Handles are opaque keys returned by [`PoolStore::open_pool()`][crate::PoolStore::open_pool].
/// They can be copied freely and remain valid until the pool is closed.
///
/// The store reuses the registry slots of closed pools. Each handle carries the generation
/// of the slot at the time the pool was opened, so a handle to a closed pool is rejected with
/// [`AllocError::UnknownPool`][crate::AllocError::UnknownPool] even after a new pool has
/// taken over its slot. Handles issued before the store was shut down are rejected the same
/// way after the store is initialized again.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PoolHandle {
    epoch: u32,
    index: usize,
    generation: u32,
}

impl PoolHandle {
    #[must_use]
    pub(crate) fn new(epoch: u32, index: usize, generation: u32) -> Self {
        Self {
            epoch,
            index,
            generation,
        }
    }

    #[must_use]
    pub(crate) fn epoch(self) -> u32 {
        self.epoch
    }

    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.index
    }

    #[must_use]
    pub(crate) fn generation(self) -> u32 {
        self.generation
    }
}

/// Identifies a live allocation in one pool of a [`PoolStore`][crate::PoolStore].
///
/// Allocation references are returned by [`PoolStore::allocate()`][crate::PoolStore::allocate]
/// and stay valid until the allocation is passed to [`PoolStore::free()`][crate::PoolStore::free].
/// They never expose the address of any internal bookkeeping structure.
///
/// A reference remembers the pool it was issued by, so passing it to a different pool is
/// detected. It also carries the generation of the region it describes, so a stale reference
/// is rejected with [`AllocError::InvalidReference`][crate::AllocError::InvalidReference]
/// even if the region descriptor has since been reused for a new allocation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AllocRef {
    pool: PoolHandle,
    region: RegionKey,
}

impl AllocRef {
    #[must_use]
    pub(crate) fn new(pool: PoolHandle, region: RegionKey) -> Self {
        Self { pool, region }
    }

    /// The pool that issued this allocation.
    #[must_use]
    pub fn pool(&self) -> PoolHandle {
        self.pool
    }

    #[must_use]
    pub(crate) fn region(&self) -> RegionKey {
        self.region
    }
}

/// Generation-checked coordinates of a region descriptor in a region ledger.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct RegionKey {
    index: usize,
    generation: u32,
}

impl RegionKey {
    #[must_use]
    pub(crate) fn new(index: usize, generation: u32) -> Self {
        Self { index, generation }
    }

    /// The index of the region descriptor in the ledger.
    #[must_use]
    pub(crate) fn index(self) -> usize {
        self.index
    }

    /// The generation the descriptor had when the key was issued.
    #[must_use]
    pub(crate) fn generation(self) -> u32 {
        self.generation
    }
}
