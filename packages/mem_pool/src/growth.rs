use std::num::NonZero;

/// Capacity growth rules for one of the growable containers of a pool store.
///
/// Three containers grow under these rules, each with its own independent [`Growth`]:
///
/// * the registry of pools in a [`PoolStore`][crate::PoolStore];
/// * the region ledger of every pool, which describes each allocation and gap;
/// * the gap index of every pool, which orders the free regions by size.
///
/// A container starts with [`initial_capacity`][Self::initial_capacity] slots. Before it
/// needs a slot, it checks its occupancy; once `used / capacity` exceeds
/// [`fill_factor`][Self::fill_factor] (or no slot is vacant at all), the capacity is
/// multiplied by [`expand_factor`][Self::expand_factor]. Containers never shrink.
///
/// # Examples
///
/// ```
/// use std::num::NonZero;
///
/// use mem_pool::{Growth, PoolStore};
///
/// let ledger = Growth::new(
///     NonZero::new(8).unwrap(),
///     0.5,
///     NonZero::new(4).unwrap(),
/// );
///
/// let store = PoolStore::builder().ledger_growth(ledger).build();
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Growth {
    initial_capacity: NonZero<usize>,
    fill_factor: f64,
    expand_factor: NonZero<usize>,
}

const DEFAULT_FILL_FACTOR: f64 = 0.75;
const DEFAULT_EXPAND_FACTOR: NonZero<usize> = NonZero::new(2).expect("2 is non-zero");

const STORE_INITIAL_CAPACITY: NonZero<usize> = NonZero::new(20).expect("20 is non-zero");
const LEDGER_INITIAL_CAPACITY: NonZero<usize> = NonZero::new(40).expect("40 is non-zero");
const GAP_INDEX_INITIAL_CAPACITY: NonZero<usize> = NonZero::new(40).expect("40 is non-zero");

impl Growth {
    /// Creates a new set of growth rules.
    ///
    /// # Panics
    ///
    /// Panics if `fill_factor` is not in the range `(0, 1]` or if `expand_factor` is less
    /// than 2 (a container that is multiplied by 1 would never grow).
    #[must_use]
    pub fn new(
        initial_capacity: NonZero<usize>,
        fill_factor: f64,
        expand_factor: NonZero<usize>,
    ) -> Self {
        assert!(
            fill_factor > 0.0 && fill_factor <= 1.0,
            "fill factor must be in the range (0, 1], got {fill_factor}"
        );
        assert!(
            expand_factor.get() >= 2,
            "expand factor must be at least 2, got {expand_factor}"
        );

        Self {
            initial_capacity,
            fill_factor,
            expand_factor,
        }
    }

    /// The default growth rules for the pool registry of a [`PoolStore`][crate::PoolStore]:
    /// 20 slots, 0.75 fill factor, doubling.
    #[must_use]
    pub fn store_default() -> Self {
        Self::new(STORE_INITIAL_CAPACITY, DEFAULT_FILL_FACTOR, DEFAULT_EXPAND_FACTOR)
    }

    /// The default growth rules for the region ledger of a pool:
    /// 40 slots, 0.75 fill factor, doubling.
    #[must_use]
    pub fn ledger_default() -> Self {
        Self::new(LEDGER_INITIAL_CAPACITY, DEFAULT_FILL_FACTOR, DEFAULT_EXPAND_FACTOR)
    }

    /// The default growth rules for the gap index of a pool:
    /// 40 entries, 0.75 fill factor, doubling.
    #[must_use]
    pub fn gap_index_default() -> Self {
        Self::new(
            GAP_INDEX_INITIAL_CAPACITY,
            DEFAULT_FILL_FACTOR,
            DEFAULT_EXPAND_FACTOR,
        )
    }

    /// The number of slots a container starts with.
    #[must_use]
    pub fn initial_capacity(&self) -> NonZero<usize> {
        self.initial_capacity
    }

    /// The occupancy ratio above which a container grows.
    #[must_use]
    pub fn fill_factor(&self) -> f64 {
        self.fill_factor
    }

    /// The multiplier applied to the capacity when a container grows.
    #[must_use]
    pub fn expand_factor(&self) -> NonZero<usize> {
        self.expand_factor
    }

    /// Whether a container with `used` occupied slots out of `capacity` must grow before it
    /// can accept another item.
    #[must_use]
    #[expect(
        clippy::cast_precision_loss,
        reason = "occupancy is a ratio, losing precision on counts beyond 2^52 is irrelevant"
    )]
    pub(crate) fn needs_growth(&self, used: usize, capacity: usize) -> bool {
        if used >= capacity {
            return true;
        }

        used as f64 > capacity as f64 * self.fill_factor
    }

    /// The capacity a container grows to from `capacity`, or `None` if that would overflow.
    #[must_use]
    pub(crate) fn next_capacity(&self, capacity: usize) -> Option<usize> {
        capacity.checked_mul(self.expand_factor.get())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    #![allow(
        clippy::float_cmp,
        reason = "we compare against the exact literals we configured"
    )]

    use super::*;

    fn nz(value: usize) -> NonZero<usize> {
        NonZero::new(value).unwrap()
    }

    #[test]
    fn defaults_match_reference_values() {
        let store = Growth::store_default();
        assert_eq!(store.initial_capacity().get(), 20);
        assert_eq!(store.fill_factor(), 0.75);
        assert_eq!(store.expand_factor().get(), 2);

        let ledger = Growth::ledger_default();
        assert_eq!(ledger.initial_capacity().get(), 40);

        let gap_index = Growth::gap_index_default();
        assert_eq!(gap_index.initial_capacity().get(), 40);
    }

    #[test]
    fn grows_only_above_fill_factor() {
        let growth = Growth::ledger_default();

        // 30 / 40 is exactly 0.75, which does not exceed the fill factor.
        assert!(!growth.needs_growth(30, 40));
        assert!(growth.needs_growth(31, 40));
    }

    #[test]
    fn full_container_always_grows() {
        let growth = Growth::new(nz(4), 1.0, nz(2));

        assert!(!growth.needs_growth(3, 4));
        assert!(growth.needs_growth(4, 4));
    }

    #[test]
    fn next_capacity_multiplies() {
        let growth = Growth::new(nz(4), 0.5, nz(3));

        assert_eq!(growth.next_capacity(4), Some(12));
        assert_eq!(growth.next_capacity(usize::MAX), None);
    }

    #[test]
    #[should_panic]
    fn zero_fill_factor_panics() {
        _ = Growth::new(nz(4), 0.0, nz(2));
    }

    #[test]
    #[should_panic]
    fn fill_factor_above_one_panics() {
        _ = Growth::new(nz(4), 1.5, nz(2));
    }

    #[test]
    #[should_panic]
    fn expand_factor_of_one_panics() {
        _ = Growth::new(nz(4), 0.75, nz(1));
    }
}
