use std::iter::FusedIterator;
use std::mem;

use crate::handles::RegionKey;
use crate::{AllocError, Growth, Result};

/// Describes one contiguous range of a pool's arena, either a live allocation or a gap.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Region {
    offset: usize,
    size: usize,
    allocated: bool,

    /// Index of the region that precedes this one in arena order.
    prev: Option<usize>,

    /// Index of the region that follows this one in arena order.
    next: Option<usize>,
}

impl Region {
    /// Offset of the first byte of the region within the arena.
    #[must_use]
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub(crate) fn is_allocated(&self) -> bool {
        self.allocated
    }

    #[must_use]
    pub(crate) fn prev(&self) -> Option<usize> {
        self.prev
    }

    #[must_use]
    pub(crate) fn next(&self) -> Option<usize> {
        self.next
    }
}

/// The growable set of region descriptors of one pool.
///
/// Active descriptors form a doubly linked chain in ascending arena offset order that covers
/// the entire arena: the chain starts at offset 0, every region starts where its predecessor
/// ends and the region sizes add up to the arena size.
///
/// Descriptors are addressed by their index in the ledger. Indexes are stable: growth appends
/// new slots without moving existing ones, and slots are never compacted. The links between
/// regions are indexes rather than pointers, so growth never invalidates them.
///
/// Vacant slots form an intrusive stack, where each vacant slot stores the index of the next
/// vacant slot. The last vacant slot points one past the end of the slot array, so appending
/// new slots extends the stack without having to relink it. A slot released by a merge is
/// reused before the ledger grows.
///
/// Each slot carries a generation that advances whenever the region it describes stops being
/// a live allocation, which lets [`RegionKey`]s detect that they have gone stale.
#[derive(Debug)]
pub(crate) struct RegionLedger {
    slots: Vec<Slot>,

    /// Head of the stack of vacant slots. Equal to `slots.len()` when every slot is active.
    next_free_index: usize,

    /// Number of active slots.
    used: usize,

    /// Index of the region at arena offset 0.
    head: Option<usize>,

    growth: Growth,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    state: SlotState,
}

#[derive(Debug)]
enum SlotState {
    Active(Region),

    Vacant {
        /// Index of the next vacant slot in the stack.
        next_free_index: usize,
    },
}

impl RegionLedger {
    /// Creates an empty ledger with the initial capacity of `growth`.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::OutOfMemory`] if the slots cannot be allocated.
    pub(crate) fn new(growth: Growth) -> Result<Self> {
        let capacity = growth.initial_capacity().get();

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_reserve_error| AllocError::OutOfMemory {
                requested: capacity.saturating_mul(mem::size_of::<Slot>()),
            })?;

        let mut ledger = Self {
            slots,
            next_free_index: 0,
            used: 0,
            head: None,
            growth,
        };

        ledger.append_vacant_slots(capacity);

        Ok(ledger)
    }

    /// Describes the whole of a freshly opened arena as a single gap and returns its index.
    ///
    /// # Panics
    ///
    /// Panics if the ledger already describes any region.
    pub(crate) fn seed(&mut self, total_size: usize) -> usize {
        assert!(self.head.is_none(), "ledger can only be seeded once");

        let index = self
            .activate(Region {
                offset: 0,
                size: total_size,
                allocated: false,
                prev: None,
                next: None,
            })
            .expect("a new ledger always has a vacant slot because its capacity is non-zero");

        self.head = Some(index);
        index
    }

    /// Number of active region descriptors.
    #[must_use]
    pub(crate) fn used(&self) -> usize {
        self.used
    }

    /// Total number of slots, active or vacant.
    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Grows the ledger if its occupancy exceeds the fill factor.
    ///
    /// Afterwards at least one slot is vacant, so a following [`split()`][Self::split] cannot
    /// fail. Callers use this to secure a slot before they mutate anything else.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::LedgerExhausted`] if the ledger needs to grow but cannot.
    pub(crate) fn reserve_slot(&mut self) -> Result<()> {
        if !self.growth.needs_growth(self.used, self.capacity()) {
            return Ok(());
        }

        self.grow()
    }

    /// Multiplies the capacity by the expand factor.
    ///
    /// Growth only appends vacant slots and never touches the active regions.
    fn grow(&mut self) -> Result<()> {
        let new_capacity = self
            .growth
            .next_capacity(self.capacity())
            .ok_or(AllocError::LedgerExhausted)?;

        let additional = new_capacity
            .checked_sub(self.capacity())
            .expect("growth always increases the capacity");

        self.slots
            .try_reserve_exact(additional)
            .map_err(|_reserve_error| AllocError::LedgerExhausted)?;

        self.append_vacant_slots(new_capacity);

        tracing::trace!(capacity = new_capacity, "region ledger grew");

        Ok(())
    }

    /// Returns the region that `key` refers to, if the key is still current.
    #[must_use]
    pub(crate) fn get(&self, key: RegionKey) -> Option<&Region> {
        let slot = self.slots.get(key.index())?;

        if slot.generation != key.generation() {
            return None;
        }

        match &slot.state {
            SlotState::Active(region) => Some(region),
            SlotState::Vacant { .. } => None,
        }
    }

    /// Returns the current key of the active region at `index`.
    ///
    /// # Panics
    ///
    /// Panics if the slot at `index` is not active.
    #[must_use]
    pub(crate) fn key(&self, index: usize) -> RegionKey {
        let slot = self.slot(index);
        assert!(
            matches!(slot.state, SlotState::Active(_)),
            "slot {index} is vacant and has no key"
        );

        RegionKey::new(index, slot.generation)
    }

    /// Returns the active region at `index`.
    ///
    /// # Panics
    ///
    /// Panics if the slot at `index` is not active.
    #[must_use]
    pub(crate) fn region(&self, index: usize) -> &Region {
        match &self.slot(index).state {
            SlotState::Active(region) => region,
            SlotState::Vacant { .. } => panic!("slot {index} is vacant, expected a region"),
        }
    }

    fn region_mut(&mut self, index: usize) -> &mut Region {
        match &mut self.slot_mut(index).state {
            SlotState::Active(region) => region,
            SlotState::Vacant { .. } => panic!("slot {index} is vacant, expected a region"),
        }
    }

    fn slot(&self, index: usize) -> &Slot {
        self.slots.get(index).unwrap_or_else(|| {
            panic!(
                "slot {index} out of bounds in ledger of capacity {}",
                self.slots.len()
            )
        })
    }

    fn slot_mut(&mut self, index: usize) -> &mut Slot {
        let capacity = self.slots.len();

        self.slots.get_mut(index).unwrap_or_else(|| {
            panic!("slot {index} out of bounds in ledger of capacity {capacity}")
        })
    }

    /// Returns the index of the first gap in arena order that holds at least `min_size` bytes.
    #[must_use]
    pub(crate) fn find_first_fit(&self, min_size: usize) -> Option<usize> {
        self.iter()
            .find(|(_, region)| !region.allocated && region.size >= min_size)
            .map(|(index, _)| index)
    }

    /// Turns the first `used_size` bytes of the gap at `index` into a live allocation.
    ///
    /// If the gap is larger than `used_size`, the remainder becomes a new gap that directly
    /// follows the allocation in arena order and its index is returned. A gap of exactly
    /// `used_size` bytes is converted as a whole and no zero-sized gap is created.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError::LedgerExhausted`] if a descriptor for the remainder is needed
    /// but the ledger cannot grow. The ledger is unchanged in that case.
    ///
    /// # Panics
    ///
    /// Panics if the region at `index` is not a gap of at least `used_size` bytes.
    pub(crate) fn split(&mut self, index: usize, used_size: usize) -> Result<Option<usize>> {
        let region = *self.region(index);

        assert!(!region.allocated, "cannot split allocated region {index}");

        let remainder = region.size.checked_sub(used_size).unwrap_or_else(|| {
            panic!(
                "cannot split {used_size} bytes from region {index} of {} bytes",
                region.size
            )
        });

        if remainder == 0 {
            self.region_mut(index).allocated = true;
            return Ok(None);
        }

        if self.next_free_index >= self.slots.len() {
            self.grow()?;
        }

        let remainder_index = self.activate(Region {
            offset: region
                .offset
                .checked_add(used_size)
                .expect("the remainder starts within the arena, so its offset cannot overflow"),
            size: remainder,
            allocated: false,
            prev: Some(index),
            next: region.next,
        })?;

        if let Some(next) = region.next {
            self.region_mut(next).prev = Some(remainder_index);
        }

        let allocated = self.region_mut(index);
        allocated.size = used_size;
        allocated.allocated = true;
        allocated.next = Some(remainder_index);

        Ok(Some(remainder_index))
    }

    /// Turns the live allocation at `index` back into a gap.
    ///
    /// Keys issued for the allocation stop being valid.
    ///
    /// # Panics
    ///
    /// Panics if the region at `index` is not a live allocation.
    pub(crate) fn release(&mut self, index: usize) {
        let region = self.region_mut(index);
        assert!(region.allocated, "region {index} is already a gap");
        region.allocated = false;

        let slot = self.slot_mut(index);
        slot.generation = slot.generation.wrapping_add(1);
    }

    /// Absorbs the gap at `b` into the gap at `a`, where `b` directly follows `a` in arena
    /// order. The slot of `b` becomes vacant and is reused by a later split.
    ///
    /// # Panics
    ///
    /// Panics if either region is allocated or if the regions are not adjacent.
    pub(crate) fn merge(&mut self, a: usize, b: usize) {
        let absorbed = *self.region(b);
        let survivor = self.region(a);

        assert!(
            survivor.next == Some(b) && absorbed.prev == Some(a),
            "regions {a} and {b} are not adjacent"
        );
        assert!(
            !survivor.allocated && !absorbed.allocated,
            "only gaps can be merged, got regions {a} and {b}"
        );

        let survivor = self.region_mut(a);
        survivor.size = survivor
            .size
            .checked_add(absorbed.size)
            .expect("merged regions lie within the arena, so their size cannot overflow");
        survivor.next = absorbed.next;

        if let Some(next) = absorbed.next {
            self.region_mut(next).prev = Some(a);
        }

        self.deactivate(b);
    }

    /// Iterates over the active regions in arena order, with their indexes.
    pub(crate) fn iter(&self) -> Iter<'_> {
        Iter {
            ledger: self,
            current: self.head,
        }
    }

    fn activate(&mut self, region: Region) -> Result<usize> {
        let index = self.next_free_index;

        let Some(slot) = self.slots.get_mut(index) else {
            return Err(AllocError::LedgerExhausted);
        };

        let previous = mem::replace(&mut slot.state, SlotState::Active(region));

        self.next_free_index = match previous {
            SlotState::Vacant { next_free_index } => next_free_index,
            SlotState::Active(_) => panic!("slot {index} on the vacant stack was active"),
        };

        // Cannot overflow because `used` never exceeds the number of slots.
        self.used = self.used.wrapping_add(1);

        Ok(index)
    }

    fn deactivate(&mut self, index: usize) {
        let next_free_index = self.next_free_index;
        let slot = self.slot_mut(index);

        let previous = mem::replace(&mut slot.state, SlotState::Vacant { next_free_index });
        assert!(
            matches!(previous, SlotState::Active(_)),
            "slot {index} was already vacant"
        );

        slot.generation = slot.generation.wrapping_add(1);

        self.next_free_index = index;

        self.used = self
            .used
            .checked_sub(1)
            .expect("an active slot was just deactivated, so the count was non-zero");
    }

    /// Appends vacant slots until the ledger has `new_capacity` slots.
    ///
    /// The vacant stack always ends at the old `slots.len()`, which is exactly the first
    /// appended slot, so the new slots extend the stack in index order.
    fn append_vacant_slots(&mut self, new_capacity: usize) {
        for index in self.slots.len()..new_capacity {
            self.slots.push(Slot {
                generation: 0,
                state: SlotState::Vacant {
                    // Cannot overflow, as that would imply the ledger is longer than
                    // virtual memory.
                    next_free_index: index.wrapping_add(1),
                },
            });
        }
    }

    /// Verifies that the chain of regions covers an arena of `total_size` bytes exactly.
    ///
    /// # Panics
    ///
    /// Panics if any structural invariant of the ledger is violated.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn integrity_check(&self, total_size: usize) {
        let mut expected_offset = 0_usize;
        let mut expected_prev = None;
        let mut count = 0_usize;

        for (index, region) in self.iter() {
            assert_eq!(
                region.offset, expected_offset,
                "region {index} does not start where its predecessor ends"
            );
            assert_eq!(
                region.prev, expected_prev,
                "region {index} has a broken back link"
            );

            expected_offset = expected_offset
                .checked_add(region.size)
                .expect("region sizes overflowed usize");
            expected_prev = Some(index);
            count = count.checked_add(1).expect("region count overflowed usize");
        }

        assert_eq!(
            expected_offset, total_size,
            "regions do not cover the whole arena"
        );
        assert_eq!(count, self.used, "chain length differs from active slot count");

        let active_slots = self
            .slots
            .iter()
            .filter(|slot| matches!(slot.state, SlotState::Active(_)))
            .count();
        assert_eq!(active_slots, self.used, "active slot count is out of sync");
    }
}

/// Iterator over the active regions of a [`RegionLedger`] in arena order.
#[derive(Debug)]
pub(crate) struct Iter<'a> {
    ledger: &'a RegionLedger,
    current: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (usize, &'a Region);

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.current?;
        let region = self.ledger.region(index);

        self.current = region.next;

        Some((index, region))
    }
}

impl FusedIterator for Iter<'_> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #![allow(
        clippy::indexing_slicing,
        reason = "we do not need to worry about these things when writing test code"
    )]

    use std::num::NonZero;

    use super::*;

    fn small_growth() -> Growth {
        Growth::new(NonZero::new(4).unwrap(), 0.75, NonZero::new(2).unwrap())
    }

    fn sizes(ledger: &RegionLedger) -> Vec<(usize, bool)> {
        ledger
            .iter()
            .map(|(_, region)| (region.size(), region.is_allocated()))
            .collect()
    }

    #[test]
    fn seed_covers_whole_arena() {
        let mut ledger = RegionLedger::new(small_growth()).unwrap();
        let head = ledger.seed(1000);

        assert_eq!(head, 0);
        assert_eq!(ledger.used(), 1);
        assert_eq!(ledger.capacity(), 4);
        assert_eq!(sizes(&ledger), vec![(1000, false)]);

        ledger.integrity_check(1000);
    }

    #[test]
    fn split_creates_remainder_after_allocation() {
        let mut ledger = RegionLedger::new(small_growth()).unwrap();
        let head = ledger.seed(1000);

        let remainder = ledger.split(head, 100).unwrap().unwrap();

        assert_eq!(sizes(&ledger), vec![(100, true), (900, false)]);
        assert_eq!(ledger.region(remainder).offset(), 100);
        assert_eq!(ledger.region(remainder).prev(), Some(head));
        assert_eq!(ledger.region(head).next(), Some(remainder));

        ledger.integrity_check(1000);
    }

    #[test]
    fn exact_split_creates_no_remainder() {
        let mut ledger = RegionLedger::new(small_growth()).unwrap();
        let head = ledger.seed(1000);

        assert_eq!(ledger.split(head, 1000).unwrap(), None);
        assert_eq!(ledger.used(), 1);
        assert_eq!(sizes(&ledger), vec![(1000, true)]);

        ledger.integrity_check(1000);
    }

    #[test]
    fn split_in_middle_relinks_successor() {
        let mut ledger = RegionLedger::new(small_growth()).unwrap();
        let head = ledger.seed(1000);

        let tail = ledger.split(head, 100).unwrap().unwrap();
        let second = ledger.split(tail, 200).unwrap().unwrap();
        ledger.release(head);

        // Allocate 40 bytes from the first gap, leaving a 60 byte gap between two allocations.
        let middle = ledger.split(head, 40).unwrap().unwrap();

        assert_eq!(
            sizes(&ledger),
            vec![(40, true), (60, false), (200, true), (700, false)]
        );
        assert_eq!(ledger.region(tail).prev(), Some(middle));
        assert_eq!(ledger.region(second).prev(), Some(tail));

        ledger.integrity_check(1000);
    }

    #[test]
    fn merge_absorbs_successor_and_frees_slot() {
        let mut ledger = RegionLedger::new(small_growth()).unwrap();
        let head = ledger.seed(1000);

        let remainder = ledger.split(head, 100).unwrap().unwrap();
        ledger.release(head);
        ledger.merge(head, remainder);

        assert_eq!(ledger.used(), 1);
        assert_eq!(sizes(&ledger), vec![(1000, false)]);

        // The slot of the absorbed region is reused first.
        let reused = ledger.split(head, 10).unwrap().unwrap();
        assert_eq!(reused, remainder);

        ledger.integrity_check(1000);
    }

    #[test]
    #[should_panic]
    fn merge_with_allocated_panics() {
        let mut ledger = RegionLedger::new(small_growth()).unwrap();
        let head = ledger.seed(1000);

        let remainder = ledger.split(head, 100).unwrap().unwrap();
        ledger.merge(head, remainder);
    }

    #[test]
    #[should_panic]
    fn merge_non_adjacent_panics() {
        let mut ledger = RegionLedger::new(small_growth()).unwrap();
        let head = ledger.seed(1000);

        let tail = ledger.split(head, 100).unwrap().unwrap();
        let last = ledger.split(tail, 100).unwrap().unwrap();
        ledger.release(head);

        ledger.merge(head, last);
    }

    #[test]
    fn reserve_grows_past_fill_factor() {
        let mut ledger = RegionLedger::new(small_growth()).unwrap();
        let head = ledger.seed(1000);
        let gap = ledger.split(head, 10).unwrap().unwrap();
        _ = ledger.split(gap, 10).unwrap().unwrap();

        // 3 of 4 is exactly the fill factor.
        ledger.reserve_slot().unwrap();
        assert_eq!(ledger.capacity(), 4);

        let gap = ledger.iter().last().unwrap().0;
        _ = ledger.split(gap, 10).unwrap().unwrap();

        ledger.reserve_slot().unwrap();
        assert_eq!(ledger.capacity(), 8);

        ledger.integrity_check(1000);
    }

    #[test]
    fn split_grows_when_full_without_moving_regions() {
        let mut ledger = RegionLedger::new(small_growth()).unwrap();
        let mut gap = ledger.seed(1000);

        for _ in 0..10 {
            gap = ledger.split(gap, 10).unwrap().unwrap();
        }

        assert_eq!(ledger.used(), 11);
        assert!(ledger.capacity() >= 11);
        assert_eq!(ledger.capacity(), 16);

        let mut expected = vec![(10, true); 10];
        expected.push((900, false));
        assert_eq!(sizes(&ledger), expected);

        ledger.integrity_check(1000);
    }

    #[test]
    fn released_key_goes_stale() {
        let mut ledger = RegionLedger::new(small_growth()).unwrap();
        let head = ledger.seed(1000);

        _ = ledger.split(head, 100).unwrap();
        let key = ledger.key(head);
        assert!(ledger.get(key).is_some());

        ledger.release(head);
        assert!(ledger.get(key).is_none());

        // The same slot becomes an allocation again, yet the old key stays stale.
        _ = ledger.split(head, 50).unwrap();
        assert!(ledger.get(key).is_none());
        assert!(ledger.get(ledger.key(head)).is_some());
    }

    #[test]
    fn first_fit_follows_arena_order() {
        let mut ledger = RegionLedger::new(small_growth()).unwrap();
        let head = ledger.seed(1000);

        let gap = ledger.split(head, 300).unwrap().unwrap();
        let gap = ledger.split(gap, 100).unwrap().unwrap();
        ledger.release(head);

        // Arena now holds: 300 gap, 100 alloc, 600 gap.
        assert_eq!(ledger.find_first_fit(200), Some(head));
        assert_eq!(ledger.find_first_fit(301), Some(gap));
        assert_eq!(ledger.find_first_fit(601), None);
    }

    #[test]
    fn get_out_of_bounds_is_none() {
        let ledger = RegionLedger::new(small_growth()).unwrap();

        assert!(ledger.get(RegionKey::new(1234, 0)).is_none());
    }
}
