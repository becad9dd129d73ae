use std::mem;
use std::thread;

use crate::builder::StoreConfig;
use crate::pool::PoolManager;
use crate::{
    AllocError, AllocRef, DropPolicy, PoolHandle, PoolInfo, PoolStoreBuilder, Policy, Result,
    Segment,
};

/// A registry of memory pools, each a fixed-size arena carved into allocations on demand.
///
/// The store owns every pool it opens. Pools are addressed by [`PoolHandle`]s and
/// allocations by [`AllocRef`]s; neither exposes any address of internal bookkeeping, so
/// handles stay meaningful while the store grows its internal structures.
///
/// A store is created uninitialized. It must be initialized with [`init()`][Self::init]
/// before pools can be opened, and it can be shut down with [`shutdown()`][Self::shutdown]
/// and initialized again later.
///
/// # Pool lifecycle
///
/// A pool is opened with a fixed size and a [`Policy`] that decides which free region serves
/// each allocation. When an allocation is freed, it is coalesced with any free neighbors, so
/// a pool whose allocations have all been freed is again a single free region. Only such a
/// pool can be closed.
///
/// # Thread safety
///
/// The store is [`Send`] but not [`Sync`]. Every operation mutates shared bookkeeping
/// without internal synchronization, so concurrent use requires external locking.
///
/// # Examples
///
/// ```
/// use mem_pool::{Policy, PoolStore, Segment};
///
/// let mut store = PoolStore::new();
/// store.init().unwrap();
///
/// let pool = store.open_pool(1_000_000, Policy::FirstFit).unwrap();
///
/// let a = store.allocate(pool, 100).unwrap();
/// let b = store.allocate(pool, 1000).unwrap();
///
/// store.free(pool, a).unwrap();
/// assert_eq!(
///     store.inspect(pool).unwrap(),
///     vec![
///         Segment::new(100, false),
///         Segment::new(1000, true),
///         Segment::new(998_900, false),
///     ]
/// );
///
/// store.free(pool, b).unwrap();
/// store.close_pool(pool).unwrap();
/// store.shutdown().unwrap();
/// ```
#[derive(Debug)]
pub struct PoolStore {
    config: StoreConfig,

    /// Advances on every [`init()`][Self::init] and survives shutdown, so handles issued
    /// before a shutdown never match pools opened after it.
    epoch: u32,

    /// `None` while the store is not initialized.
    registry: Option<Registry>,
}

#[derive(Debug)]
struct Registry {
    /// The store epoch this registry was created in.
    epoch: u32,

    /// Slots are never removed or compacted. A closed pool leaves behind an empty slot that
    /// the next opened pool may take over.
    slots: Vec<PoolSlot>,

    /// Number of slots that hold an open pool.
    open: usize,
}

#[derive(Debug, Default)]
struct PoolSlot {
    /// Advances every time a pool is closed, invalidating the handles issued for it.
    generation: u32,

    pool: Option<PoolManager>,
}

impl PoolStore {
    /// Creates an uninitialized store with the default configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use mem_pool::PoolStore;
    ///
    /// let mut store = PoolStore::new();
    /// assert!(!store.is_initialized());
    ///
    /// store.init().unwrap();
    /// assert!(store.is_initialized());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new [`PoolStore`].
    ///
    /// Use this when you want to customize the store configuration beyond the defaults.
    pub fn builder() -> PoolStoreBuilder {
        PoolStoreBuilder::new()
    }

    #[must_use]
    pub(crate) fn new_inner(config: StoreConfig) -> Self {
        Self {
            config,
            epoch: 0,
            registry: None,
        }
    }

    /// Initializes the store, making it ready to open pools.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::AlreadyInitialized`] if the store is already initialized and
    /// [`AllocError::OutOfMemory`] if the registry cannot be allocated.
    pub fn init(&mut self) -> Result<()> {
        if self.registry.is_some() {
            return Err(AllocError::AlreadyInitialized);
        }

        let capacity = self.config.store_growth.initial_capacity().get();

        let mut slots = Vec::new();
        reserve_slots(&mut slots, capacity)?;
        slots.resize_with(capacity, PoolSlot::default);

        self.epoch = self.epoch.wrapping_add(1);

        self.registry = Some(Registry {
            epoch: self.epoch,
            slots,
            open: 0,
        });

        tracing::debug!(capacity, epoch = self.epoch, "pool store initialized");

        Ok(())
    }

    /// Shuts the store down, closing every open pool and releasing the registry.
    ///
    /// Open pools without live allocations are closed implicitly. If any open pool still has
    /// live allocations, nothing is closed and the store remains initialized.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::NotInitialized`] if the store is not initialized and
    /// [`AllocError::PoolsStillOpen`] if any pool still has live allocations.
    ///
    /// # Examples
    ///
    /// ```
    /// use mem_pool::{AllocError, Policy, PoolStore};
    ///
    /// let mut store = PoolStore::new();
    /// store.init().unwrap();
    ///
    /// let pool = store.open_pool(1000, Policy::BestFit).unwrap();
    /// let alloc = store.allocate(pool, 10).unwrap();
    ///
    /// assert_eq!(
    ///     store.shutdown(),
    ///     Err(AllocError::PoolsStillOpen { open_pools: 1 })
    /// );
    ///
    /// store.free(pool, alloc).unwrap();
    ///
    /// // The pool is empty now, so shutting down closes it.
    /// store.shutdown().unwrap();
    /// ```
    pub fn shutdown(&mut self) -> Result<()> {
        let registry = self.registry.as_ref().ok_or(AllocError::NotInitialized)?;

        let open_pools = registry.pools_in_use();

        if open_pools != 0 {
            tracing::debug!(open_pools, "pool store shutdown refused");
            return Err(AllocError::PoolsStillOpen { open_pools });
        }

        let closed_pools = registry.open;
        self.registry = None;

        tracing::debug!(closed_pools, "pool store shut down");

        Ok(())
    }

    /// Whether the store has been initialized and not shut down since.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.registry.is_some()
    }

    /// The number of open pools. Zero if the store is not initialized.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.as_ref().map_or(0, |registry| registry.open)
    }

    /// Whether the store has no open pools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of pool slots in the registry. Zero if the store is not initialized.
    ///
    /// The registry grows as pools are opened and never shrinks while the store is
    /// initialized.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.registry
            .as_ref()
            .map_or(0, |registry| registry.slots.len())
    }

    /// Opens a pool with an arena of `size` bytes, initially a single free region.
    ///
    /// The pool takes the first free slot of the registry, growing the registry if its
    /// occupancy exceeds the fill factor.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::NotInitialized`] if the store is not initialized,
    /// [`AllocError::ZeroSize`] if `size` is zero and [`AllocError::OutOfMemory`] if the
    /// arena, its bookkeeping or the grown registry cannot be allocated. Nothing is
    /// registered on failure.
    pub fn open_pool(&mut self, size: usize, policy: Policy) -> Result<PoolHandle> {
        let config = self.config;
        let registry = self.registry.as_mut().ok_or(AllocError::NotInitialized)?;

        let pool = PoolManager::open(
            size,
            policy,
            config.ledger_growth,
            config.gap_index_growth,
        )?;

        if config
            .store_growth
            .needs_growth(registry.open, registry.slots.len())
        {
            registry.grow(&config)?;
        }

        let (index, slot) = registry
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.pool.is_none())
            .expect("the registry has a vacant slot after growing");

        slot.pool = Some(pool);
        let handle = PoolHandle::new(registry.epoch, index, slot.generation);

        registry.open = registry
            .open
            .checked_add(1)
            .expect("open pools are bounded by the registry length, so this cannot overflow");

        tracing::debug!(pool = index, size, %policy, "pool opened");

        Ok(handle)
    }

    /// Closes a pool and releases its arena.
    ///
    /// The handle, and every handle copied from it, is invalid afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::NotInitialized`] if the store is not initialized,
    /// [`AllocError::UnknownPool`] if the handle does not identify an open pool and
    /// [`AllocError::NotEmpty`] if the pool is not a single free region.
    pub fn close_pool(&mut self, handle: PoolHandle) -> Result<()> {
        let registry = self.registry.as_mut().ok_or(AllocError::NotInitialized)?;
        let slot = registry.slot_mut(handle)?;

        let pool = slot.pool.as_ref().ok_or(AllocError::UnknownPool)?;

        if let Err(error) = pool.ensure_closeable() {
            tracing::debug!(pool = handle.index(), %error, "pool not closed");
            return Err(error);
        }

        slot.pool = None;
        slot.generation = slot.generation.wrapping_add(1);

        registry.open = registry
            .open
            .checked_sub(1)
            .expect("a pool was just closed, so the count was non-zero");

        tracing::debug!(pool = handle.index(), "pool closed");

        Ok(())
    }

    /// Allocates `size` bytes from a pool.
    ///
    /// The pool's [`Policy`] decides which free region serves the request. The returned
    /// reference stays valid until it is passed to [`free()`][Self::free].
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::NotInitialized`] if the store is not initialized,
    /// [`AllocError::UnknownPool`] if the handle does not identify an open pool,
    /// [`AllocError::ZeroSize`] if `size` is zero, [`AllocError::NoSuitableGap`] if no free
    /// region is large enough and [`AllocError::LedgerExhausted`] if the pool cannot grow
    /// its bookkeeping. The pool is unchanged on failure.
    ///
    /// # Examples
    ///
    /// ```
    /// use mem_pool::{AllocError, Policy, PoolStore};
    ///
    /// let mut store = PoolStore::new();
    /// store.init().unwrap();
    ///
    /// let pool = store.open_pool(1000, Policy::FirstFit).unwrap();
    /// let alloc = store.allocate(pool, 999).unwrap();
    ///
    /// assert_eq!(
    ///     store.allocate(pool, 2),
    ///     Err(AllocError::NoSuitableGap { requested: 2 })
    /// );
    /// # store.free(pool, alloc).unwrap();
    /// ```
    pub fn allocate(&mut self, handle: PoolHandle, size: usize) -> Result<AllocRef> {
        let pool = self.pool_mut(handle)?;

        let key = match pool.allocate(size) {
            Ok(key) => key,
            Err(error) => {
                tracing::debug!(pool = handle.index(), size, %error, "allocation failed");
                return Err(error);
            }
        };

        let offset = pool.allocation_offset(key)?;
        tracing::trace!(pool = handle.index(), size, offset, "allocated");

        Ok(AllocRef::new(handle, key))
    }

    /// Returns an allocation to its pool.
    ///
    /// The freed region is merged with any free neighbors. The reference, and every
    /// reference copied from it, is invalid afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::NotInitialized`] if the store is not initialized,
    /// [`AllocError::UnknownPool`] if the handle does not identify an open pool and
    /// [`AllocError::InvalidReference`] if the reference does not identify a live allocation
    /// of that pool.
    pub fn free(&mut self, handle: PoolHandle, alloc: AllocRef) -> Result<()> {
        let pool = self.pool_mut(handle)?;

        if alloc.pool() != handle {
            return Err(AllocError::InvalidReference);
        }

        let key = alloc.region();
        let size = pool.allocation_size(key)?;
        let offset = pool.allocation_offset(key)?;

        pool.free(key)?;

        tracing::trace!(pool = handle.index(), size, offset, "freed");

        Ok(())
    }

    /// Describes every region of a pool in ascending arena offset order.
    ///
    /// The snapshot is a copy; it does not change when the pool is modified afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::NotInitialized`] if the store is not initialized and
    /// [`AllocError::UnknownPool`] if the handle does not identify an open pool.
    pub fn inspect(&self, handle: PoolHandle) -> Result<Vec<Segment>> {
        Ok(self.pool(handle)?.inspect())
    }

    /// Returns the current metadata of a pool.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::NotInitialized`] if the store is not initialized and
    /// [`AllocError::UnknownPool`] if the handle does not identify an open pool.
    ///
    /// # Examples
    ///
    /// ```
    /// use mem_pool::{Policy, PoolStore};
    ///
    /// let mut store = PoolStore::new();
    /// store.init().unwrap();
    ///
    /// let pool = store.open_pool(1000, Policy::BestFit).unwrap();
    /// let alloc = store.allocate(pool, 100).unwrap();
    ///
    /// let info = store.pool_info(pool).unwrap();
    /// assert_eq!(info.total_size(), 1000);
    /// assert_eq!(info.alloc_size(), 100);
    /// assert_eq!(info.num_allocs(), 1);
    /// assert_eq!(info.num_gaps(), 1);
    /// # store.free(pool, alloc).unwrap();
    /// ```
    pub fn pool_info(&self, handle: PoolHandle) -> Result<PoolInfo> {
        Ok(self.pool(handle)?.info())
    }

    /// Size of a live allocation, in bytes.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`bytes()`][Self::bytes].
    pub fn allocation_size(&self, handle: PoolHandle, alloc: AllocRef) -> Result<usize> {
        self.checked_pool(handle, alloc)?
            .allocation_size(alloc.region())
    }

    /// Offset of a live allocation from the start of its pool's arena, in bytes.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`bytes()`][Self::bytes].
    pub fn allocation_offset(&self, handle: PoolHandle, alloc: AllocRef) -> Result<usize> {
        self.checked_pool(handle, alloc)?
            .allocation_offset(alloc.region())
    }

    /// Borrows the bytes of a live allocation.
    ///
    /// The memory of a new pool is zeroed. Freeing an allocation does not clear its bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::NotInitialized`] if the store is not initialized,
    /// [`AllocError::UnknownPool`] if the handle does not identify an open pool and
    /// [`AllocError::InvalidReference`] if the reference does not identify a live allocation
    /// of that pool.
    pub fn bytes(&self, handle: PoolHandle, alloc: AllocRef) -> Result<&[u8]> {
        self.checked_pool(handle, alloc)?.bytes(alloc.region())
    }

    /// Exclusively borrows the bytes of a live allocation.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`bytes()`][Self::bytes].
    ///
    /// # Examples
    ///
    /// ```
    /// use mem_pool::{Policy, PoolStore};
    ///
    /// let mut store = PoolStore::new();
    /// store.init().unwrap();
    ///
    /// let pool = store.open_pool(64, Policy::FirstFit).unwrap();
    /// let alloc = store.allocate(pool, 5).unwrap();
    ///
    /// store
    ///     .bytes_mut(pool, alloc)
    ///     .unwrap()
    ///     .copy_from_slice(b"hello");
    ///
    /// assert_eq!(store.bytes(pool, alloc).unwrap(), b"hello");
    /// # store.free(pool, alloc).unwrap();
    /// ```
    pub fn bytes_mut(&mut self, handle: PoolHandle, alloc: AllocRef) -> Result<&mut [u8]> {
        if alloc.pool() != handle {
            // Validate the handle first so that an unknown pool is reported as such.
            self.pool(handle)?;
            return Err(AllocError::InvalidReference);
        }

        self.pool_mut(handle)?.bytes_mut(alloc.region())
    }

    fn checked_pool(&self, handle: PoolHandle, alloc: AllocRef) -> Result<&PoolManager> {
        let pool = self.pool(handle)?;

        if alloc.pool() != handle {
            return Err(AllocError::InvalidReference);
        }

        Ok(pool)
    }

    fn pool(&self, handle: PoolHandle) -> Result<&PoolManager> {
        let registry = self.registry.as_ref().ok_or(AllocError::NotInitialized)?;

        registry
            .slot(handle)?
            .pool
            .as_ref()
            .ok_or(AllocError::UnknownPool)
    }

    fn pool_mut(&mut self, handle: PoolHandle) -> Result<&mut PoolManager> {
        let registry = self.registry.as_mut().ok_or(AllocError::NotInitialized)?;

        registry
            .slot_mut(handle)?
            .pool
            .as_mut()
            .ok_or(AllocError::UnknownPool)
    }
}

impl Registry {
    fn slot(&self, handle: PoolHandle) -> Result<&PoolSlot> {
        if handle.epoch() != self.epoch {
            return Err(AllocError::UnknownPool);
        }

        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .ok_or(AllocError::UnknownPool)
    }

    fn slot_mut(&mut self, handle: PoolHandle) -> Result<&mut PoolSlot> {
        if handle.epoch() != self.epoch {
            return Err(AllocError::UnknownPool);
        }

        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .ok_or(AllocError::UnknownPool)
    }

    /// Number of open pools that still have live allocations.
    fn pools_in_use(&self) -> usize {
        self.slots
            .iter()
            .filter_map(|slot| slot.pool.as_ref())
            .filter(|pool| pool.num_allocs() != 0)
            .count()
    }

    fn grow(&mut self, config: &StoreConfig) -> Result<()> {
        let new_capacity = config
            .store_growth
            .next_capacity(self.slots.len())
            .ok_or(AllocError::OutOfMemory {
                requested: usize::MAX,
            })?;

        let additional = new_capacity
            .checked_sub(self.slots.len())
            .expect("growth always increases the capacity");

        reserve_slots(&mut self.slots, additional)?;
        self.slots.resize_with(new_capacity, PoolSlot::default);

        tracing::trace!(capacity = new_capacity, "pool registry grew");

        Ok(())
    }
}

fn reserve_slots(slots: &mut Vec<PoolSlot>, additional: usize) -> Result<()> {
    slots
        .try_reserve_exact(additional)
        .map_err(|_reserve_error| AllocError::OutOfMemory {
            requested: additional.saturating_mul(mem::size_of::<PoolSlot>()),
        })
}

impl Default for PoolStore {
    /// Creates an uninitialized [`PoolStore`] with the default configuration.
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PoolStore {
    fn drop(&mut self) {
        // If we are already panicking, we do not want to panic again because that will
        // simply obscure whatever the original panic was, leading to debug difficulties.
        if self.config.drop_policy != DropPolicy::MustNotDropPools || thread::panicking() {
            return;
        }

        let pools_in_use = self.registry.as_ref().map_or(0, Registry::pools_in_use);

        assert!(
            pools_in_use == 0,
            "dropped a pool store with {pools_in_use} pool(s) still holding live allocations, \
             with a policy that says pools must be empty when the store is dropped"
        );
    }
}
