//! Resume filter (component F): drops already-seen documents from the head of a freshly
//! resumed cursor before it's allowed to join the merge.
//!
//! Necessary because the server pages by byte budget, not by document count: a page fetched
//! with a resume-positioned server token almost always re-delivers some documents the client
//! already emitted, up to and including the exact document it stopped on.

use crate::{
    cursor::{Advance, DocumentContainer, PartitionCursor},
    query_spec::SortKey,
    rid::ResourceId,
    token::ResumeKey,
    ErrorKind,
};
use std::cmp::Ordering;
use tokio_util::sync::CancellationToken;

/// What happened while resume-filtering a cursor.
#[derive(Debug, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The cursor is ready for the merge: either primed with a head beyond the resume point,
    /// or cleanly exhausted.
    Ready,
    /// The underlying range went away mid-filter; the caller must run the split protocol
    /// (§4.G) and re-run this filter against the freshly primed child cursors.
    Split,
}

/// Runs the resume filter on `cursor`, fetching pages as needed until its head is strictly
/// beyond `resume`'s position (or the cursor is exhausted).
///
/// `resume.skip_count` additionally accounts for a run of documents that tie on both sort
/// values and RID (possible under self-joins): that many extra ties, starting from the one
/// matching `resume.rid`, are discarded as well.
#[tracing::instrument(level = "debug", skip(cursor, container, sort_key, cancel), fields(range = %cursor.range().id))]
pub async fn apply(
    cursor: &mut PartitionCursor,
    container: &dyn DocumentContainer,
    sort_key: &SortKey,
    resume: &ResumeKey,
    page_size: u32,
    cancel: &CancellationToken,
) -> crate::Result<ResumeOutcome> {
    let mut remaining_skip = resume.skip_count as i64;

    loop {
        match cursor.try_advance(container, page_size, cancel).await? {
            Advance::Exhausted => {
                tracing::debug!("cursor exhausted while applying resume filter");
                return Ok(ResumeOutcome::Ready);
            }
            Advance::Split => {
                return Ok(ResumeOutcome::Split);
            }
            Advance::Ready => {}
        }

        let Some(head) = cursor.head() else {
            unreachable!("Advance::Ready guarantees a buffered head");
        };

        let cmp = sort_key.compare(&resume.sort_values, &head.sort_values)?;
        match cmp {
            Ordering::Less => {
                // The head is strictly beyond the resume point: keep it.
                return Ok(ResumeOutcome::Ready);
            }
            Ordering::Greater => {
                // Unreachable under correct server behavior (the resume point itself was once
                // this cursor's head). Treat defensively as "already seen" and skip it.
                tracing::warn!("resumed cursor head sorts before its own resume point");
                cursor.discard_head();
            }
            Ordering::Equal => {
                require_same_container(&head.rid, &resume.rid)?;

                let reverse = cursor
                    .execution_info()
                    .map(|info| info.reverse_rid_comparison())
                    .unwrap_or(false);
                let mut rid_cmp = head.rid.compare_document(&resume.rid);
                if reverse {
                    rid_cmp = rid_cmp.reverse();
                }

                match rid_cmp {
                    Ordering::Less => {
                        cursor.discard_head();
                    }
                    Ordering::Equal => {
                        if remaining_skip >= 0 {
                            remaining_skip -= 1;
                            cursor.discard_head();
                        } else {
                            return Ok(ResumeOutcome::Ready);
                        }
                    }
                    Ordering::Greater => {
                        return Ok(ResumeOutcome::Ready);
                    }
                }
            }
        }
    }
}

fn require_same_container(head_rid: &ResourceId, resume_rid: &ResourceId) -> crate::Result<()> {
    head_rid.require_same_container(resume_rid).map_err(|_| {
        ErrorKind::MalformedContinuation.with_message(format!(
            "resumed document '{}' is not from the same database/collection as resume RID '{}'",
            head_rid.to_raw(),
            resume_rid.to_raw()
        ))
    })
}
