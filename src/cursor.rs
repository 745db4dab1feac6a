//! Partition cursor (component E): a resumable page enumerator for one partition range.
//!
//! The surrounding merge engine is the only thing that drives a cursor; a cursor never fetches
//! on its own. Fetches are asynchronous and may suspend at I/O boundaries (§5), so the seam to
//! the host is expressed with [`futures::future::BoxFuture`] rather than a plain callback —
//! this crate carries no particular async runtime opinion, matching the rest of the workspace's
//! use of `futures` for executor-agnostic seams.

use std::collections::VecDeque;

use futures::future::{self, BoxFuture, Either};
use tokio_util::sync::CancellationToken;

use crate::{query_spec::{OrderByResult, QuerySpec}, range::Range, ErrorKind};

/// Races `fut` against `cancel`, dropping `fut` (aborting whatever fetch it represents) and
/// returning `ErrorKind::Cancelled` if the token fires first (§5).
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl std::future::Future<Output = crate::Result<T>>,
) -> crate::Result<T> {
    if cancel.is_cancelled() {
        return Err(ErrorKind::Cancelled.with_message("operation was cancelled before starting"));
    }
    match future::select(Box::pin(fut), Box::pin(cancel.cancelled())).await {
        Either::Left((result, _)) => result,
        Either::Right((_, _)) => Err(ErrorKind::Cancelled.with_message("operation was cancelled")),
    }
}

/// Execution-info flags carried on a page, used by the resume filter (§4.F) to decide which
/// RID-tie-break rule a given page's server used.
///
/// Each flag is an `Option` because which one the resume filter should honor is decided by
/// *presence*, not by the boolean value: older servers populate only `reverse_rid_enabled`,
/// newer ones only `reverse_index_scan`. `None` means the server didn't report that flag at all.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutionInfo {
    pub reverse_rid_enabled: Option<bool>,
    pub reverse_index_scan: Option<bool>,
}

impl ExecutionInfo {
    /// Whether the RID tie-break in §4.F should flip its comparison sign, per whichever flag
    /// the server actually reported. Prefers `reverse_index_scan` (newer servers) when both are
    /// somehow present; defaults to no reversal when neither is.
    pub fn reverse_rid_comparison(&self) -> bool {
        self.reverse_index_scan
            .or(self.reverse_rid_enabled)
            .unwrap_or(false)
    }
}

/// One page fetched from a partition.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub results: Vec<OrderByResult>,
    pub next_server_token: Option<String>,
    pub execution_info: Option<ExecutionInfo>,
}

/// The result of a single fetch attempt against a partition range.
pub enum FetchOutcome {
    /// A page of results (possibly empty, if the server token is non-`None` more remain).
    Page(Page),
    /// The range is gone (HTTP 410, partition-key-range-gone); the merge engine must replace
    /// this cursor with one per child range.
    Gone,
}

/// The external collaborator this crate pulls pages from and asks for child ranges on split.
///
/// Implemented by the host around its own transport/paginator; this crate has no opinion on
/// HTTP, retries, or auth (§1, out of scope) beyond the retry policy implied by `TransientFetch`
/// (§7): a `fetch_page` future should only resolve to `Err` once its own retries are exhausted.
pub trait DocumentContainer: Send + Sync {
    /// `cancel` is the signal this fetch should race against (§5): a well-behaved
    /// implementation aborts its own in-flight request once `cancel.is_cancelled()`, but the
    /// crate also races this future itself, so an implementation that ignores `cancel` still
    /// produces a timely `ErrorKind::Cancelled` rather than hanging the merge.
    fn fetch_page<'a>(
        &'a self,
        range: &'a Range,
        query: &'a QuerySpec,
        server_token: Option<&'a str>,
        page_size: u32,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, crate::Result<FetchOutcome>>;

    fn child_ranges<'a>(
        &'a self,
        range: &'a Range,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, crate::Result<Vec<Range>>>;
}

/// What happened when a cursor tried to advance to a usable head.
#[derive(Debug, PartialEq, Eq)]
pub enum Advance {
    /// The cursor now has a buffered head; `head()` will return `Some`.
    Ready,
    /// The cursor has no more results and no more pages to fetch.
    Exhausted,
    /// The underlying range is gone; the caller must run the split protocol (§4.G).
    Split,
}

/// A resumable, server-backed page enumerator for one partition range.
pub struct PartitionCursor {
    range: Range,
    query: QuerySpec,
    server_token: Option<String>,
    buffer: VecDeque<OrderByResult>,
    execution_info: Option<ExecutionInfo>,
    exhausted: bool,
}

impl PartitionCursor {
    /// Creates a cursor ready to fetch its first page. `server_token` is the resume key's
    /// server token, if this cursor is being reconstructed from a continuation token.
    pub fn new(range: Range, query: QuerySpec, server_token: Option<String>) -> Self {
        Self {
            range,
            query,
            server_token,
            buffer: VecDeque::new(),
            execution_info: None,
            exhausted: false,
        }
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    pub fn query(&self) -> &QuerySpec {
        &self.query
    }

    pub fn execution_info(&self) -> Option<ExecutionInfo> {
        self.execution_info
    }

    /// The next buffered result, without consuming it.
    pub fn head(&self) -> Option<&OrderByResult> {
        self.buffer.front()
    }

    /// Consumes the head, if any.
    pub fn pop(&mut self) -> Option<OrderByResult> {
        self.buffer.pop_front()
    }

    /// Drops `n` buffered results from the head without examining them, used by the resume
    /// filter (§4.F) to discard already-seen documents.
    pub fn discard_head(&mut self) {
        self.buffer.pop_front();
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// The resume key that would let a fresh cursor pick up exactly where this one left off:
    /// the head's sort values and RID (if buffered), the target's skip count, and the current
    /// server token.
    pub fn current_server_token(&self) -> Option<&str> {
        self.server_token.as_deref()
    }

    /// Ensures the cursor has a buffered head (or is known `Exhausted`/`Split`), fetching pages
    /// as needed. Loops internally past empty pages that still carry a continuation, which the
    /// server can return under byte-budget paging.
    #[tracing::instrument(level = "debug", skip(self, container, cancel), fields(range = %self.range.id))]
    pub async fn try_advance(
        &mut self,
        container: &dyn DocumentContainer,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> crate::Result<Advance> {
        if !self.buffer.is_empty() {
            return Ok(Advance::Ready);
        }
        if self.exhausted {
            return Ok(Advance::Exhausted);
        }

        loop {
            tracing::trace!(server_token = ?self.server_token, "fetching page");
            let outcome = cancellable(
                cancel,
                container.fetch_page(
                    &self.range,
                    &self.query,
                    self.server_token.as_deref(),
                    page_size,
                    cancel,
                ),
            )
            .await?;

            let page = match outcome {
                FetchOutcome::Gone => {
                    tracing::debug!("range is gone, signalling split");
                    return Ok(Advance::Split);
                }
                FetchOutcome::Page(page) => page,
            };

            self.execution_info = page.execution_info;
            self.server_token = page.next_server_token;
            self.buffer.extend(page.results);

            if !self.buffer.is_empty() {
                return Ok(Advance::Ready);
            }
            if self.server_token.is_none() {
                tracing::debug!("cursor exhausted");
                self.exhausted = true;
                return Ok(Advance::Exhausted);
            }
            // Empty page but more to fetch: loop and fetch again.
        }
    }
}
