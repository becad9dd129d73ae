use std::fmt;

use crate::Policy;

/// One region of a pool's arena, as reported by [`PoolStore::inspect()`][crate::PoolStore::inspect].
///
/// A snapshot lists the segments in ascending arena offset order. Together they cover the
/// whole arena without overlapping.
///
/// # Examples
///
/// ```
/// use mem_pool::{Policy, PoolStore, Segment};
///
/// let mut store = PoolStore::new();
/// store.init().unwrap();
///
/// let pool = store.open_pool(1000, Policy::FirstFit).unwrap();
/// let alloc = store.allocate(pool, 100).unwrap();
///
/// assert_eq!(
///     store.inspect(pool).unwrap(),
///     vec![Segment::new(100, true), Segment::new(900, false)]
/// );
/// # store.free(pool, alloc).unwrap();
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Segment {
    size: usize,
    allocated: bool,
}

impl Segment {
    /// Creates a segment description, typically to compare against an inspection snapshot.
    #[must_use]
    pub const fn new(size: usize, allocated: bool) -> Self {
        Self { size, allocated }
    }

    /// Size of the region, in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the region is a live allocation (`true`) or a gap (`false`).
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.allocated
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.allocated { "alloc" } else { "gap" };
        write!(f, "{:>10} - {kind}", self.size)
    }
}

/// Point-in-time metadata of one pool, as reported by
/// [`PoolStore::pool_info()`][crate::PoolStore::pool_info].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PoolInfo {
    pub(crate) total_size: usize,
    pub(crate) alloc_size: usize,
    pub(crate) policy: Policy,
    pub(crate) num_allocs: usize,
    pub(crate) num_gaps: usize,
}

impl PoolInfo {
    /// Size of the pool's arena, in bytes. This never changes after the pool is opened.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Sum of the sizes of all live allocations, in bytes.
    #[must_use]
    pub fn alloc_size(&self) -> usize {
        self.alloc_size
    }

    /// The placement policy the pool was opened with.
    #[must_use]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Number of live allocations.
    #[must_use]
    pub fn num_allocs(&self) -> usize {
        self.num_allocs
    }

    /// Number of free regions. A pool with no allocations has exactly one.
    #[must_use]
    pub fn num_gaps(&self) -> usize {
        self.num_gaps
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn display_right_aligns_size() {
        assert_eq!(Segment::new(100, true).to_string(), "       100 - alloc");
        assert_eq!(Segment::new(999_900, false).to_string(), "    999900 - gap");
    }
}
