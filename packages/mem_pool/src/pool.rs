use crate::arena::Arena;
use crate::gap_index::{GapEntry, GapIndex};
use crate::handles::RegionKey;
use crate::ledger::{Region, RegionLedger};
use crate::{AllocError, Growth, Policy, PoolInfo, Result, Segment};

/// One open pool: an arena together with the region ledger that partitions it and the gap
/// index over its free regions.
///
/// Every mutating operation is all-or-nothing. Anything that can fail (ledger or gap index
/// growth, lookups) is done before the first structural change, so an error leaves the
/// arena bookkeeping exactly as it was.
#[derive(Debug)]
pub(crate) struct PoolManager {
    arena: Arena,
    ledger: RegionLedger,
    gaps: GapIndex,
    policy: Policy,

    /// Sum of the sizes of all live allocations.
    alloc_size: usize,

    num_allocs: usize,
}

impl PoolManager {
    /// Opens a pool whose arena is a single gap of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ZeroSize`] if `size` is zero and [`AllocError::OutOfMemory`]
    /// if the arena or the bookkeeping structures cannot be allocated. Anything allocated
    /// before the failure is released again.
    pub(crate) fn open(
        size: usize,
        policy: Policy,
        ledger_growth: Growth,
        gap_index_growth: Growth,
    ) -> Result<Self> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let arena = Arena::new(size)?;
        let mut ledger = RegionLedger::new(ledger_growth)?;
        let mut gaps = GapIndex::new(gap_index_growth)?;

        let head = ledger.seed(size);

        // The initial capacity is non-zero, so the first entry always fits.
        gaps.insert(GapEntry::new(size, 0, head));

        let pool = Self {
            arena,
            ledger,
            gaps,
            policy,
            alloc_size: 0,
            num_allocs: 0,
        };

        #[cfg(debug_assertions)]
        pool.integrity_check();

        Ok(pool)
    }

    #[must_use]
    pub(crate) fn total_size(&self) -> usize {
        self.arena.len()
    }

    #[must_use]
    pub(crate) fn num_allocs(&self) -> usize {
        self.num_allocs
    }

    #[must_use]
    pub(crate) fn num_gaps(&self) -> usize {
        self.gaps.len()
    }

    #[must_use]
    pub(crate) fn info(&self) -> PoolInfo {
        PoolInfo {
            total_size: self.total_size(),
            alloc_size: self.alloc_size,
            policy: self.policy,
            num_allocs: self.num_allocs,
            num_gaps: self.num_gaps(),
        }
    }

    /// Checks that the pool may be closed, which requires the arena to be a single gap.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::NotEmpty`] if the pool has live allocations or more than one gap.
    pub(crate) fn ensure_closeable(&self) -> Result<()> {
        if self.num_allocs != 0 || self.num_gaps() != 1 {
            return Err(AllocError::NotEmpty {
                num_allocs: self.num_allocs,
                num_gaps: self.num_gaps(),
            });
        }

        Ok(())
    }

    /// Carves an allocation of `size` bytes out of a gap chosen by the pool's policy.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::ZeroSize`] if `size` is zero, [`AllocError::NoSuitableGap`] if
    /// no gap is large enough and [`AllocError::LedgerExhausted`] if the ledger cannot grow
    /// to describe the leftover part of the chosen gap.
    pub(crate) fn allocate(&mut self, size: usize) -> Result<RegionKey> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let candidate = match self.policy {
            Policy::FirstFit => self.ledger.find_first_fit(size),
            Policy::BestFit => self.gaps.find_best_fit(size).map(|entry| entry.region()),
        }
        .ok_or(AllocError::NoSuitableGap { requested: size })?;

        if self.policy == Policy::FirstFit {
            debug_assert_eq!(
                self.gaps.find_first_fit(size).map(|entry| entry.region()),
                Some(candidate),
                "arena order walk and gap index disagree on the first fit"
            );
        }

        let entry = self.gap_entry(candidate);

        if entry.size() > size {
            self.ledger.reserve_slot()?;
        }

        self.gaps.remove(entry)?;

        let remainder = self
            .ledger
            .split(candidate, size)
            .expect("a vacant ledger slot was reserved before the gap was split");

        if let Some(remainder) = remainder {
            let remainder = self.gap_entry(remainder);

            // An entry was just removed, so there is room for its replacement.
            self.gaps.insert(remainder);
        }

        self.num_allocs = self
            .num_allocs
            .checked_add(1)
            .expect("every allocation has a distinct ledger slot, so the count cannot overflow");
        self.alloc_size = self
            .alloc_size
            .checked_add(size)
            .expect("allocations lie within the arena, so their sizes cannot overflow");

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(self.ledger.key(candidate))
    }

    /// Returns a live allocation to the pool, coalescing it with any neighboring gaps.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidReference`] if `key` does not identify a live allocation
    /// in this pool.
    pub(crate) fn free(&mut self, key: RegionKey) -> Result<()> {
        let region = *self.live_region(key)?;
        let index = key.index();

        // Coalescing may leave the gap count unchanged or lower, but freeing between two
        // allocations adds an entry.
        self.gaps.reserve_one()?;

        let next_gap = region.next().filter(|next| !self.ledger.region(*next).is_allocated());
        let prev_gap = region.prev().filter(|prev| !self.ledger.region(*prev).is_allocated());

        let next_entry = next_gap.map(|next| self.gap_entry(next));
        let prev_entry = prev_gap.map(|prev| self.gap_entry(prev));

        if let Some(entry) = next_entry {
            self.gaps.remove(entry)?;
        }

        if let Some(entry) = prev_entry {
            if let Err(error) = self.gaps.remove(entry) {
                if let Some(entry) = next_entry {
                    self.gaps.insert(entry);
                }

                return Err(error);
            }
        }

        self.ledger.release(index);

        self.num_allocs = self
            .num_allocs
            .checked_sub(1)
            .expect("a live allocation was just released, so the count was non-zero");
        self.alloc_size = self
            .alloc_size
            .checked_sub(region.size())
            .expect("the released allocation was counted in the allocated size");

        // Successor first, then predecessor, so that the surviving slot is always the
        // lowest-offset region of the coalesced run.
        if let Some(next) = next_gap {
            self.ledger.merge(index, next);
        }

        let survivor = match prev_gap {
            Some(prev) => {
                self.ledger.merge(prev, index);
                prev
            }
            None => index,
        };

        let merged = self.gap_entry(survivor);
        self.gaps.insert(merged);

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(())
    }

    /// Describes every region of the arena in arena order.
    #[must_use]
    pub(crate) fn inspect(&self) -> Vec<Segment> {
        self.ledger
            .iter()
            .map(|(_, region)| Segment::new(region.size(), region.is_allocated()))
            .collect()
    }

    /// Size of the live allocation identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidReference`] if `key` does not identify a live allocation.
    pub(crate) fn allocation_size(&self, key: RegionKey) -> Result<usize> {
        Ok(self.live_region(key)?.size())
    }

    /// Arena offset of the live allocation identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidReference`] if `key` does not identify a live allocation.
    pub(crate) fn allocation_offset(&self, key: RegionKey) -> Result<usize> {
        Ok(self.live_region(key)?.offset())
    }

    /// Borrows the bytes of the live allocation identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidReference`] if `key` does not identify a live allocation.
    pub(crate) fn bytes(&self, key: RegionKey) -> Result<&[u8]> {
        let region = *self.live_region(key)?;

        Ok(self.arena.bytes(region.offset(), region.size()))
    }

    /// Exclusively borrows the bytes of the live allocation identified by `key`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::InvalidReference`] if `key` does not identify a live allocation.
    pub(crate) fn bytes_mut(&mut self, key: RegionKey) -> Result<&mut [u8]> {
        let region = *self.live_region(key)?;

        Ok(self.arena.bytes_mut(region.offset(), region.size()))
    }

    fn live_region(&self, key: RegionKey) -> Result<&Region> {
        self.ledger
            .get(key)
            .filter(|region| region.is_allocated())
            .ok_or(AllocError::InvalidReference)
    }

    fn gap_entry(&self, index: usize) -> GapEntry {
        let region = self.ledger.region(index);
        debug_assert!(!region.is_allocated(), "region {index} is not a gap");

        GapEntry::new(region.size(), region.offset(), index)
    }

    /// Verifies that the ledger, the gap index and the pool metadata agree with each other.
    ///
    /// # Panics
    ///
    /// Panics if any invariant is violated.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn integrity_check(&self) {
        self.ledger.integrity_check(self.total_size());
        self.gaps.integrity_check();

        let mut num_allocs = 0_usize;
        let mut num_gaps = 0_usize;
        let mut alloc_size = 0_usize;
        let mut previous_was_gap = false;

        for (index, region) in self.ledger.iter() {
            if region.is_allocated() {
                num_allocs = num_allocs.checked_add(1).expect("count overflowed usize");
                alloc_size = alloc_size
                    .checked_add(region.size())
                    .expect("size overflowed usize");
                previous_was_gap = false;
            } else {
                assert!(!previous_was_gap, "gap {index} directly follows another gap");
                assert!(region.size() > 0, "gap {index} is empty");
                num_gaps = num_gaps.checked_add(1).expect("count overflowed usize");
                previous_was_gap = true;
            }
        }

        assert_eq!(num_allocs, self.num_allocs, "allocation count is out of sync");
        assert_eq!(alloc_size, self.alloc_size, "allocated size is out of sync");
        assert_eq!(num_gaps, self.gaps.len(), "gap index size is out of sync");

        for entry in self.gaps.iter() {
            let region = self.ledger.region(entry.region());

            assert!(
                !region.is_allocated(),
                "gap index refers to allocated region {}",
                entry.region()
            );
            assert_eq!(
                (entry.size(), entry.offset()),
                (region.size(), region.offset()),
                "gap index entry for region {} is out of date",
                entry.region()
            );
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #![allow(
        clippy::indexing_slicing,
        reason = "we do not need to worry about these things when writing test code"
    )]

    use std::num::NonZero;

    use super::*;

    const ARENA: usize = 1_000_000;

    fn open(size: usize, policy: Policy) -> PoolManager {
        PoolManager::open(
            size,
            policy,
            Growth::ledger_default(),
            Growth::gap_index_default(),
        )
        .unwrap()
    }

    fn alloc(size: usize) -> Segment {
        Segment::new(size, true)
    }

    fn gap(size: usize) -> Segment {
        Segment::new(size, false)
    }

    #[test]
    fn opens_as_single_gap() {
        let pool = open(ARENA, Policy::FirstFit);

        assert_eq!(pool.inspect(), vec![gap(ARENA)]);

        let info = pool.info();
        assert_eq!(info.total_size(), ARENA);
        assert_eq!(info.alloc_size(), 0);
        assert_eq!(info.num_allocs(), 0);
        assert_eq!(info.num_gaps(), 1);
        assert_eq!(info.policy(), Policy::FirstFit);

        pool.integrity_check();
    }

    #[test]
    fn zero_size_pool_is_rejected() {
        let result = PoolManager::open(
            0,
            Policy::BestFit,
            Growth::ledger_default(),
            Growth::gap_index_default(),
        );

        assert_eq!(result.unwrap_err(), AllocError::ZeroSize);
    }

    #[test]
    fn first_fit_alloc_free_walk() {
        let mut pool = open(ARENA, Policy::FirstFit);

        let a = pool.allocate(100).unwrap();
        assert_eq!(pool.inspect(), vec![alloc(100), gap(999_900)]);

        let b = pool.allocate(1000).unwrap();
        assert_eq!(pool.inspect(), vec![alloc(100), alloc(1000), gap(998_900)]);

        pool.free(a).unwrap();
        assert_eq!(pool.inspect(), vec![gap(100), alloc(1000), gap(998_900)]);
        assert_eq!(pool.num_gaps(), 2);

        pool.free(b).unwrap();
        assert_eq!(pool.inspect(), vec![gap(ARENA)]);
        assert_eq!(pool.info().alloc_size(), 0);

        pool.ensure_closeable().unwrap();
    }

    #[test]
    fn first_fit_takes_lowest_offset_gap() {
        let mut pool = open(1000, Policy::FirstFit);

        let a = pool.allocate(300).unwrap();
        _ = pool.allocate(100).unwrap();
        let c = pool.allocate(100).unwrap();
        _ = pool.allocate(100).unwrap();
        pool.free(a).unwrap();
        pool.free(c).unwrap();

        // 300 gap, 100 alloc, 100 gap, 100 alloc, 400 gap.
        let d = pool.allocate(100).unwrap();
        assert_eq!(pool.allocation_offset(d).unwrap(), 0);
        assert_eq!(
            pool.inspect(),
            vec![alloc(100), gap(200), alloc(100), gap(100), alloc(100), gap(400)]
        );
    }

    #[test]
    fn best_fit_reuses_smallest_gap() {
        let mut pool = open(ARENA, Policy::BestFit);

        let allocs: Vec<_> = (0..10).map(|_| pool.allocate(100).unwrap()).collect();

        for index in [1, 2, 4, 6, 7, 8] {
            pool.free(allocs[index]).unwrap();
        }

        assert_eq!(
            pool.inspect(),
            vec![
                alloc(100),
                gap(200),
                alloc(100),
                gap(100),
                alloc(100),
                gap(300),
                alloc(100),
                gap(999_000),
            ]
        );

        let reused = pool.allocate(100).unwrap();
        assert_eq!(pool.allocation_offset(reused).unwrap(), 400);

        assert_eq!(
            pool.inspect(),
            vec![
                alloc(100),
                gap(200),
                alloc(100),
                alloc(100),
                alloc(100),
                gap(300),
                alloc(100),
                gap(999_000),
            ]
        );
    }

    #[test]
    fn best_fit_prefers_smallest_over_first() {
        let mut pool = open(ARENA, Policy::BestFit);

        let allocs: Vec<_> = (0..10).map(|_| pool.allocate(100).unwrap()).collect();

        for index in [2, 1, 3, 6, 5, 8] {
            pool.free(allocs[index]).unwrap();
        }

        // 100 alloc, 300 gap, 100 alloc, 200 gap, 100 alloc, 100 gap, 100 alloc, rest gap.
        let a = pool.allocate(150).unwrap();
        assert_eq!(pool.allocation_offset(a).unwrap(), 500);

        // The 50 bytes left over from the 200 gap are now the tightest fit.
        let b = pool.allocate(50).unwrap();
        assert_eq!(pool.allocation_offset(b).unwrap(), 650);

        let c = pool.allocate(60).unwrap();
        assert_eq!(pool.allocation_offset(c).unwrap(), 800);
    }

    #[test]
    fn exact_fit_leaves_no_empty_gap() {
        let mut pool = open(1000, Policy::BestFit);

        let a = pool.allocate(1000).unwrap();

        assert_eq!(pool.inspect(), vec![alloc(1000)]);
        assert_eq!(pool.num_gaps(), 0);

        assert_eq!(
            pool.allocate(1),
            Err(AllocError::NoSuitableGap { requested: 1 })
        );

        pool.free(a).unwrap();
        assert_eq!(pool.inspect(), vec![gap(1000)]);
    }

    #[test]
    fn oversized_request_changes_nothing() {
        let mut pool = open(ARENA, Policy::FirstFit);
        _ = pool.allocate(999_000).unwrap();

        let before = pool.inspect();
        let info_before = pool.info();

        assert_eq!(
            pool.allocate(1001),
            Err(AllocError::NoSuitableGap { requested: 1001 })
        );

        assert_eq!(pool.inspect(), before);
        assert_eq!(pool.info(), info_before);
    }

    #[test]
    fn zero_size_allocation_is_rejected() {
        let mut pool = open(1000, Policy::FirstFit);

        assert_eq!(pool.allocate(0), Err(AllocError::ZeroSize));
        assert_eq!(pool.inspect(), vec![gap(1000)]);
    }

    #[test]
    fn close_requires_single_gap() {
        let mut pool = open(ARENA, Policy::FirstFit);

        let a = pool.allocate(100).unwrap();
        assert_eq!(
            pool.ensure_closeable(),
            Err(AllocError::NotEmpty {
                num_allocs: 1,
                num_gaps: 1
            })
        );

        pool.free(a).unwrap();
        pool.ensure_closeable().unwrap();
    }

    #[test]
    fn double_free_is_invalid_reference() {
        let mut pool = open(1000, Policy::FirstFit);

        let a = pool.allocate(100).unwrap();
        pool.free(a).unwrap();

        assert_eq!(pool.free(a), Err(AllocError::InvalidReference));
    }

    #[test]
    fn stale_key_does_not_match_reused_slot() {
        let mut pool = open(1000, Policy::FirstFit);

        let a = pool.allocate(100).unwrap();
        pool.free(a).unwrap();

        // Lands in the same slot and at the same offset.
        let b = pool.allocate(100).unwrap();
        assert_eq!(a.index(), b.index());

        assert_eq!(pool.allocation_size(a), Err(AllocError::InvalidReference));
        assert_eq!(pool.allocation_size(b), Ok(100));
    }

    #[test]
    fn merged_away_key_is_invalid() {
        let mut pool = open(1000, Policy::FirstFit);

        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(100).unwrap();
        pool.free(a).unwrap();
        pool.free(b).unwrap();

        assert_eq!(pool.free(b), Err(AllocError::InvalidReference));
        assert_eq!(pool.bytes(b).unwrap_err(), AllocError::InvalidReference);
    }

    #[test]
    fn free_coalesces_both_sides() {
        let mut pool = open(1000, Policy::FirstFit);

        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(100).unwrap();
        let c = pool.allocate(100).unwrap();
        _ = pool.allocate(100).unwrap();

        pool.free(a).unwrap();
        pool.free(c).unwrap();
        assert_eq!(pool.num_gaps(), 3);

        pool.free(b).unwrap();
        assert_eq!(pool.inspect(), vec![gap(300), alloc(100), gap(600)]);
        assert_eq!(pool.num_gaps(), 2);
    }

    #[test]
    fn allocations_do_not_overlap_in_arena() {
        let mut pool = open(64, Policy::FirstFit);

        let a = pool.allocate(16).unwrap();
        let b = pool.allocate(16).unwrap();

        pool.bytes_mut(a).unwrap().fill(0xAA);
        pool.bytes_mut(b).unwrap().fill(0xBB);

        assert!(pool.bytes(a).unwrap().iter().all(|byte| *byte == 0xAA));
        assert!(pool.bytes(b).unwrap().iter().all(|byte| *byte == 0xBB));
        assert_eq!(pool.bytes(a).unwrap().len(), 16);
    }

    #[test]
    fn ledger_growth_keeps_keys_valid() {
        let tiny = Growth::new(NonZero::new(1).unwrap(), 0.75, NonZero::new(2).unwrap());
        let mut pool = PoolManager::open(10_000, Policy::BestFit, tiny, tiny).unwrap();

        let keys: Vec<_> = (1..=50).map(|size| pool.allocate(size).unwrap()).collect();

        for (size, key) in (1..=50).zip(&keys) {
            assert_eq!(pool.allocation_size(*key), Ok(size));
        }

        for key in keys.iter().step_by(2) {
            pool.free(*key).unwrap();
        }
        for key in keys.iter().skip(1).step_by(2) {
            pool.free(*key).unwrap();
        }

        assert_eq!(pool.inspect(), vec![gap(10_000)]);
        pool.ensure_closeable().unwrap();
    }
}
