//! The query handed to each partition, and the shape of what comes back (component I).

use std::{cmp::Ordering, collections::HashMap};

use crate::{rid::ResourceId, value::Value, ErrorKind};

/// The placeholder the gateway-rewritten query text uses for the per-partition resume filter.
/// Substituted by `crate::filter` before the query is sent to a partition.
pub const FORMATTABLE_ORDER_BY_FILTER: &str = "{documentdb-formattableorderbyquery-filter}";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One `ORDER BY` clause item: the expression text as it appears in the rewritten query, plus
/// its direction.
#[derive(Clone, Debug)]
pub struct OrderByItem {
    pub expression: String,
    pub direction: SortOrder,
}

/// The ordered, non-empty list of `ORDER BY` items a query was planned with. Kept as its own
/// type because both the filter synthesizer and the merge engine's comparator need the
/// direction list and the arity derived from it.
#[derive(Clone, Debug)]
pub struct SortKey(Vec<OrderByItem>);

impl SortKey {
    pub fn new(items: Vec<OrderByItem>) -> crate::Result<Self> {
        if items.is_empty() {
            return Err(crate::ErrorKind::InternalInvariant
                .with_message("sort key must have at least one ORDER BY item"));
        }
        Ok(Self(items))
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn items(&self) -> &[OrderByItem] {
        &self.0
    }

    /// Compares two sort-value tuples in the *natural* ascending sense: `Less` means `a` sorts
    /// before `b` once every column's direction has been applied, regardless of whether any
    /// individual column is itself descending. Callers that need the merge engine's inverted,
    /// max-heap sense should flip the result themselves.
    pub fn compare(&self, a: &[Value], b: &[Value]) -> crate::Result<Ordering> {
        if a.len() != self.arity() || b.len() != self.arity() {
            return Err(ErrorKind::InternalInvariant
                .with_message("sort value tuple length disagrees with the sort key's arity"));
        }

        for ((item, av), bv) in self.0.iter().zip(a).zip(b) {
            let cmp = av.compare(bv);
            let cmp = match item.direction {
                SortOrder::Ascending => cmp,
                SortOrder::Descending => cmp.reverse(),
            };
            if cmp != Ordering::Equal {
                return Ok(cmp);
            }
        }
        Ok(Ordering::Equal)
    }
}

/// The query text and parameters sent to each partition, prior to filter substitution.
#[derive(Clone, Debug)]
pub struct QuerySpec {
    pub text: String,
    pub parameters: HashMap<String, serde_json::Value>,
}

impl QuerySpec {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: HashMap::new(),
        }
    }

    /// Returns a copy of this spec with every occurrence of the formattable-filter placeholder
    /// replaced by `filter`.
    pub fn with_filter_substituted(&self, filter: &str) -> QuerySpec {
        QuerySpec {
            text: self.text.replace(FORMATTABLE_ORDER_BY_FILTER, filter),
            parameters: self.parameters.clone(),
        }
    }
}

/// A single row returned by a partition for an `ORDER BY` query: the sort-key tuple the
/// server evaluated, the document's RID, and its payload.
#[derive(Clone, Debug)]
pub struct OrderByResult {
    pub sort_values: Vec<Value>,
    pub rid: ResourceId,
    pub payload: serde_json::Value,
}
