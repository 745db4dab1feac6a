//! Partition mapping (component C): classifying the active range set relative to the merge
//! token's target partition.
//!
//! On a fresh (non-resumed) construction there is no target yet — every range simply starts
//! with no resume key, and `crate::stage` builds cursors directly without going through this
//! module. This module only runs when a [`MergeToken`] is being reconstructed.

use crate::{range::Range, token::{MergeToken, ResumeKey}, ErrorKind};

/// The three disjoint groups a [`map`] call partitions the active range set into.
pub struct PartitionMap {
    pub left_of_target: Vec<(Range, Option<ResumeKey>)>,
    pub target: (Range, ResumeKey),
    pub right_of_target: Vec<(Range, Option<ResumeKey>)>,
}

/// Classifies `active` (the current live range set) against `token`.
///
/// Locates the target range — the one `token`'s first entry was captured against — in
/// `active`, first by an exact id+bounds match and, failing that, by finding the single active
/// range whose interval subsumes the token's target interval (the range merged since the token
/// was persisted). Every other active range is then bucketed by comparing its `min` against
/// the resolved target range's `min`; ranges with no corresponding entry in `token` (because
/// they're new children of a split that happened after the token was persisted) get resume key
/// `None` and are positioned the same way.
///
/// Fails with `MalformedContinuation` if the target range can't be resolved: it isn't present
/// and isn't subsumed by exactly one active range.
#[tracing::instrument(level = "debug", skip(active, token))]
pub fn map(active: &[Range], token: &MergeToken) -> crate::Result<PartitionMap> {
    let (token_target_range, token_target_key) = token.target();

    let target_active = resolve_target(active, token_target_range)?;
    tracing::debug!(target = %target_active.id, "resolved continuation token target range");

    let mut left_of_target = Vec::new();
    let mut right_of_target = Vec::new();
    let mut target = None;

    for range in active {
        if range.id == target_active.id {
            target = Some((range.clone(), token_target_key.clone()));
            continue;
        }

        let resume_key = token
            .iter()
            .find(|(token_range, _)| token_range.id == range.id)
            .map(|(_, key)| key.clone());

        if resume_key.is_none() {
            tracing::trace!(range = %range.id, "range has no token entry, treating as a post-token split child");
        }

        if range.min < target_active.min {
            left_of_target.push((range.clone(), resume_key));
        } else {
            right_of_target.push((range.clone(), resume_key));
        }
    }

    let target = target.expect("resolve_target returns a range that is present in `active`");

    Ok(PartitionMap {
        left_of_target,
        target,
        right_of_target,
    })
}

/// Finds the active range that corresponds to `token_target`, either exactly or via
/// single-range subsumption.
fn resolve_target<'a>(active: &'a [Range], token_target: &Range) -> crate::Result<&'a Range> {
    if let Some(exact) = active.iter().find(|r| {
        r.id == token_target.id && r.min == token_target.min && r.max == token_target.max
    }) {
        tracing::trace!(range = %exact.id, "target range matched exactly");
        return Ok(exact);
    }

    let mut subsuming = active
        .iter()
        .filter(|r| r.min <= token_target.min && token_target.max <= r.max);

    let candidate = subsuming.next().ok_or_else(|| {
        tracing::warn!(target = %token_target.id, "target range unresolvable: not present and not subsumed");
        ErrorKind::MalformedContinuation.with_message(format!(
            "target range '{}' is not present in the active range set and is not subsumed by any active range",
            token_target.id
        ))
    })?;

    if subsuming.next().is_some() {
        tracing::warn!(target = %token_target.id, "target range subsumed by more than one active range");
        return Err(ErrorKind::MalformedContinuation.with_message(format!(
            "target range '{}' is subsumed by more than one active range",
            token_target.id
        )));
    }

    tracing::debug!(target = %token_target.id, merged_into = %candidate.id, "target range recovered via subsumption");
    Ok(candidate)
}
