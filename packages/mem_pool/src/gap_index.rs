use std::mem;

use crate::{AllocError, Growth, Result};

/// One free region as seen by the gap index.
///
/// Entries order by size first and arena offset second, so the smallest sufficient gap at
/// the lowest offset sorts first among all candidates for a request.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) struct GapEntry {
    size: usize,
    offset: usize,

    /// Index of the region in the region ledger.
    region: usize,
}

impl GapEntry {
    #[must_use]
    pub(crate) fn new(size: usize, offset: usize, region: usize) -> Self {
        Self {
            size,
            offset,
            region,
        }
    }

    #[must_use]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub(crate) fn region(&self) -> usize {
        self.region
    }
}

/// Size-ordered index over the free regions of one pool.
///
/// The index is a sorted vector maintained with binary search, so lookups are logarithmic
/// and insertions and removals shift at most the tail of the vector. Gap counts per pool are
/// modest, which keeps the shifting cheap.
///
/// The index has a logical capacity governed by its [`Growth`] rules. Callers reserve room
/// with [`reserve_one()`][Self::reserve_one] before they start mutating any pool structure,
/// which keeps a failed growth from leaving a half-applied operation behind.
#[derive(Debug)]
pub(crate) struct GapIndex {
    entries: Vec<GapEntry>,
    capacity: usize,
    growth: Growth,
}

impl GapIndex {
    /// Creates an empty index with the initial capacity of `growth`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] if the entries cannot be allocated.
    pub(crate) fn new(growth: Growth) -> Result<Self> {
        let capacity = growth.initial_capacity().get();

        let mut entries = Vec::new();
        reserve_entries(&mut entries, capacity)?;

        Ok(Self {
            entries,
            capacity,
            growth,
        })
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Grows the index if its occupancy exceeds the fill factor, guaranteeing room for at
    /// least one more [`insert()`][Self::insert].
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] if the index needs to grow but cannot. The index is
    /// unchanged in that case.
    pub(crate) fn reserve_one(&mut self) -> Result<()> {
        if !self.growth.needs_growth(self.entries.len(), self.capacity) {
            return Ok(());
        }

        let new_capacity =
            self.growth
                .next_capacity(self.capacity)
                .ok_or(AllocError::OutOfMemory {
                    requested: usize::MAX,
                })?;

        let additional = new_capacity
            .checked_sub(self.entries.len())
            .expect("the new capacity exceeds the current capacity, which bounds the length");

        reserve_entries(&mut self.entries, additional)?;
        self.capacity = new_capacity;

        tracing::trace!(capacity = new_capacity, "gap index grew");

        Ok(())
    }

    /// Adds a gap to the index, keeping the entries in ascending order.
    ///
    /// # Panics
    ///
    /// Panics if the index is at capacity (the caller did not reserve room) or if the entry
    /// is already present.
    pub(crate) fn insert(&mut self, entry: GapEntry) {
        assert!(
            self.entries.len() < self.capacity,
            "gap index is full, room must be reserved before inserting"
        );

        match self.entries.binary_search(&entry) {
            Ok(_) => panic!("gap {entry:?} is already in the gap index"),
            Err(position) => self.entries.insert(position, entry),
        }
    }

    /// Removes a gap from the index.
    ///
    /// The entry is located by its exact identity, not merely by size, since many gaps may
    /// share a size.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::NotFound`] if the entry is not in the index.
    pub(crate) fn remove(&mut self, entry: GapEntry) -> Result<()> {
        let position = self
            .entries
            .binary_search(&entry)
            .map_err(|_insert_position| AllocError::NotFound)?;

        self.entries.remove(position);

        Ok(())
    }

    /// Returns the smallest gap that holds at least `min_size` bytes. Among equally sized
    /// gaps, the one at the lowest arena offset is returned.
    #[must_use]
    pub(crate) fn find_best_fit(&self, min_size: usize) -> Option<GapEntry> {
        let first_sufficient = self.entries.partition_point(|entry| entry.size < min_size);

        self.entries.get(first_sufficient).copied()
    }

    /// Returns the gap at the lowest arena offset that holds at least `min_size` bytes.
    ///
    /// This agrees with a walk of the region chain in arena order but has to inspect every
    /// sufficient entry, so pools do not use it for placement.
    #[must_use]
    pub(crate) fn find_first_fit(&self, min_size: usize) -> Option<GapEntry> {
        let first_sufficient = self.entries.partition_point(|entry| entry.size < min_size);

        self.entries
            .get(first_sufficient..)
            .and_then(|candidates| candidates.iter().min_by_key(|entry| entry.offset))
            .copied()
    }

    /// Iterates over the entries in ascending order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &GapEntry> {
        self.entries.iter()
    }

    /// Verifies that the entries are strictly ascending and within capacity.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of order or overfull.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn integrity_check(&self) {
        assert!(
            self.entries.len() <= self.capacity,
            "gap index holds {} entries but has a capacity of {}",
            self.entries.len(),
            self.capacity
        );

        assert!(
            self.entries.is_sorted_by(|a, b| a < b),
            "gap index entries are not strictly ascending"
        );
    }
}

fn reserve_entries(entries: &mut Vec<GapEntry>, additional: usize) -> Result<()> {
    entries
        .try_reserve_exact(additional)
        .map_err(|_reserve_error| AllocError::OutOfMemory {
            requested: additional.saturating_mul(mem::size_of::<GapEntry>()),
        })
}
