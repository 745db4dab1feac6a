//! Partition ranges: half-open hash intervals owned by one physical partition.

use std::borrow::Cow;

/// A half-open interval `[min, max)` of partition-key hash space, plus the opaque identifier
/// the document container uses to address the physical partition.
///
/// Ranges are ordered by `min`; this ordering is what the merge engine uses as the
/// tie-breaker in §4.G.1, and what the partition mapper (`crate::partition_map`) uses to
/// classify ranges relative to the target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Range {
    pub id: Cow<'static, str>,
    pub min: String,
    pub max: String,
}

impl Range {
    pub fn new(
        id: impl Into<Cow<'static, str>>,
        min: impl Into<String>,
        max: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            min: min.into(),
            max: max.into(),
        }
    }

    /// A range is strictly below another if its whole interval sorts before the other's.
    /// Since ranges in a disjoint cover never overlap, comparing minimums is sufficient.
    pub fn is_left_of(&self, other: &Range) -> bool {
        self.min < other.min
    }

    pub fn is_right_of(&self, other: &Range) -> bool {
        self.min > other.min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn ranges_order_by_min() {
        let a = Range::new("a", "00", "80");
        let b = Range::new("b", "80", "FF");
        assert!(a.is_left_of(&b));
        assert!(b.is_right_of(&a));
        assert!(!a.is_right_of(&b));
    }
}
