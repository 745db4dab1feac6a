//! Filter synthesizer (component D): turns a resume point into the three per-partition SQL
//! fragments substituted for the formattable-filter placeholder in the rewritten query.

use crate::{
    query_spec::{SortKey, SortOrder},
    value::Value,
    ErrorKind,
};

/// The three filter fragments produced for a given resume point: the ones substituted into
/// the left-of-target, target, and right-of-target query variants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesizedFilters {
    pub left: String,
    pub target: String,
    pub right: String,
}

/// Synthesizes the three filters for `sort_key` given the target partition's resume sort
/// values, or the trivial "always true" filters when there is no resume state yet.
///
/// Fails with `InternalInvariant` if any resume sort value is (or contains, recursively)
/// `Value::Undefined` — a resume key is captured from an already-emitted document's sort
/// values, and `Undefined` has no SQL literal form to filter on (§4.I).
#[tracing::instrument(level = "debug", skip(sort_key, resume_sort_values))]
pub fn synthesize(
    sort_key: &SortKey,
    resume_sort_values: Option<&[Value]>,
) -> crate::Result<SynthesizedFilters> {
    let Some(resume_sort_values) = resume_sort_values else {
        tracing::trace!("no resume state, using trivial filters");
        return Ok(SynthesizedFilters {
            left: "true".to_string(),
            target: "true".to_string(),
            right: "true".to_string(),
        });
    };

    tracing::debug!(columns = resume_sort_values.len(), "synthesizing resume filters");

    Ok(SynthesizedFilters {
        left: disjunction(sort_key, resume_sort_values, false)?,
        target: "true".to_string(),
        right: disjunction(sort_key, resume_sort_values, true)?,
    })
}

/// Builds the "strictly greater (or, if `final_non_strict`, greater-or-equal) than the resume
/// tuple" predicate in disjunctive normal form, per §4.D.
///
/// For each prefix length `p` in `1..=k`, the disjunct requires equality on the first `p - 1`
/// columns and a (non-)strict comparison, direction-adjusted, on the `p`th. Only the final
/// (full-length) disjunct uses the non-strict comparator when `final_non_strict` is set; every
/// shorter prefix must stay strict, since a shorter prefix match means a later column hasn't
/// been reached yet and so can't be satisfied merely by being equal.
fn disjunction(
    sort_key: &SortKey,
    resume_sort_values: &[Value],
    final_non_strict: bool,
) -> crate::Result<String> {
    let items = sort_key.items();
    let k = items.len();

    let disjuncts = (1..=k)
        .map(|p| {
            let mut clauses = Vec::with_capacity(p);
            for (item, value) in items.iter().zip(resume_sort_values).take(p - 1) {
                clauses.push(format!("{} = {}", item.expression, literal(value)?));
            }

            let last = &items[p - 1];
            let last_value = &resume_sort_values[p - 1];
            let strict = p < k || !final_non_strict;
            let op = comparator(last.direction, strict);
            clauses.push(format!("{} {} {}", last.expression, op, literal(last_value)?));

            Ok(format!("({})", clauses.join(" AND ")))
        })
        .collect::<crate::Result<Vec<String>>>()?;

    Ok(disjuncts.join(" OR "))
}

fn comparator(direction: SortOrder, strict: bool) -> &'static str {
    match (direction, strict) {
        (SortOrder::Ascending, true) => ">",
        (SortOrder::Ascending, false) => ">=",
        (SortOrder::Descending, true) => "<",
        (SortOrder::Descending, false) => "<=",
    }
}

/// Encodes a [`Value`] using the database's SQL literal grammar: numbers unquoted, strings
/// single-quoted with `'` doubled, null/booleans as keywords, composites recursively.
///
/// `Value::Undefined` has no literal form in this grammar and is rejected with
/// `InternalInvariant` rather than silently coerced to some placeholder, since a resume key
/// that names an undefined sort value can never be matched correctly by a filter (§4.I).
pub fn literal(value: &Value) -> crate::Result<String> {
    match value {
        Value::Undefined => {
            tracing::warn!("rejecting Undefined resume sort value: no SQL literal form");
            Err(ErrorKind::InternalInvariant
                .with_message("Undefined has no SQL literal form and cannot appear in a resume key"))
        }
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
        Value::Array(items) => {
            let parts = items.iter().map(literal).collect::<crate::Result<Vec<_>>>()?;
            Ok(format!("[{}]", parts.join(", ")))
        }
        Value::Object(fields) => {
            let parts = fields
                .iter()
                .map(|(k, v)| Ok(format!("\"{}\": {}", k.replace('"', "\\\""), literal(v)?)))
                .collect::<crate::Result<Vec<String>>>()?;
            Ok(format!("{{{}}}", parts.join(", ")))
        }
    }
}
