//! # Region Ordering
//!
//! Every region carries a nesting depth. A region entered while another is
//! active on the same lineage receives a strictly greater depth, so a smaller
//! depth means "lives at least as long".
//!
//! [`region_min`] is the join used whenever a value's region cannot be
//! determined exactly: at merge points (struct/array construction from
//! several sources) and at control-flow joins. Folding it over the
//! contributing regions yields the conservative region for the merged value.
//!
//! ## Laws
//!
//! The operator is the minimum of a total order on `(depth, id)`:
//!
//! - `region_min(a, b) == region_min(b, a)`
//! - `region_min(region_min(a, b), c) == region_min(a, region_min(b, c))`
//! - `region_min(a, a) == a`
//!
//! Ties in depth cannot occur along one active lineage. Between unrelated
//! regions (e.g. sibling task regions) the older region, with the smaller id,
//! wins.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Region identifier.
///
/// Ids are never reused, so an id also serves as the generation tag checked
/// when a fat pointer is dereferenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(pub u64);

impl RegionId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Region({})", self.0)
    }
}

/// Global region ID counter.
static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a new unique region ID.
pub fn next_region_id() -> RegionId {
    RegionId(NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Nesting depth of a region.
pub type Depth = u32;

/// Copyable reference to a region: its identity and nesting depth.
///
/// This is the back-reference carried by every value allocated from a
/// region. It does not keep the region alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionHandle {
    id: RegionId,
    depth: Depth,
}

impl RegionHandle {
    /// Create a handle from its parts.
    pub const fn new(id: RegionId, depth: Depth) -> Self {
        Self { id, depth }
    }

    /// The region's identifier.
    pub const fn id(&self) -> RegionId {
        self.id
    }

    /// The region's nesting depth.
    pub const fn depth(&self) -> Depth {
        self.depth
    }

    /// Whether the region is still live.
    pub fn is_live(&self) -> bool {
        crate::registry::is_live(self.id)
    }
}

impl PartialOrd for RegionHandle {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for RegionHandle {
    /// Longer-lived regions order first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.depth
            .cmp(&other.depth)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.depth)
    }
}

/// Anything that names the region it lives in.
pub trait RegionScoped {
    /// Handle of the owning region.
    fn region(&self) -> RegionHandle;
}

impl RegionScoped for RegionHandle {
    fn region(&self) -> RegionHandle {
        *self
    }
}

impl<T: RegionScoped + ?Sized> RegionScoped for &T {
    fn region(&self) -> RegionHandle {
        (**self).region()
    }
}

/// Return whichever of `a`, `b` lives longer (has the smaller depth).
pub fn region_min<R: RegionScoped>(a: R, b: R) -> R {
    if b.region() < a.region() {
        b
    } else {
        a
    }
}

/// Fold [`region_min`] over a set of regions.
///
/// Returns `None` for an empty set.
pub fn region_min_all<R, I>(regions: I) -> Option<R>
where
    R: RegionScoped,
    I: IntoIterator<Item = R>,
{
    regions.into_iter().reduce(region_min)
}

/// Whether `a` is guaranteed to live at least as long as `b`.
pub fn outlives<A: RegionScoped, B: RegionScoped>(a: &A, b: &B) -> bool {
    a.region() <= b.region()
}
