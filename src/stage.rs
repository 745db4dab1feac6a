//! Stage facade (component H): the pull-style external interface this crate exposes to its
//! host — `advance()` returning a page of results plus the continuation token as of its last
//! result, or signalling end of stream.
//!
//! The spec's tri-state `Page | EndOfStream | Fault` collapses onto this crate's own
//! [`crate::Result`]: a fault is just `advance()` returning `Err`, rather than a third
//! enum variant, since the crate already carries an error type for exactly this.

use tokio_util::sync::CancellationToken;

use crate::{
    config::StageConfig,
    cursor::DocumentContainer,
    merge::MergeEngine,
    query_spec::{OrderByResult, QuerySpec, SortKey},
    range::Range,
    token::MergeToken,
};

/// One batch of results handed back to the caller: a bounded run of emitted [`OrderByResult`]s
/// plus the continuation token as of the last one. `continuation_token` is `None` exactly when
/// this page's last result was also the final result of the whole stream.
#[derive(Clone, Debug)]
pub struct Page {
    pub results: Vec<OrderByResult>,
    pub continuation_token: Option<MergeToken>,
}

/// What a single `advance()` call produced.
#[derive(Debug)]
pub enum StageOutcome {
    /// A non-empty batch of results.
    Page(Page),
    /// The merge is complete; no further calls to `advance()` will produce results.
    EndOfStream,
}

/// Cross-partition `ORDER BY` execution over one query, from construction (fresh or resumed)
/// through to stream completion.
///
/// Single-threaded cooperative scheduling (§5): `advance()` must not be called re-entrantly,
/// and this type enforces nothing to stop a caller who does — like the merge engine it wraps,
/// it assumes a single in-flight call at a time.
pub struct OrderByStage<'a> {
    engine: MergeEngine<'a>,
    config: StageConfig,
    terminated: bool,
}

impl<'a> OrderByStage<'a> {
    /// Constructs a stage for `query` against `ranges`, starting fresh or resuming from
    /// `config.initial_token` (§4.C, §4.G Initialization).
    ///
    /// Fails with `MalformedContinuation` before issuing any network traffic if the initial
    /// token's sort-value arity disagrees with `sort_key`'s, or if its target range can't be
    /// resolved against `ranges` (S6).
    pub async fn new(
        container: &'a dyn DocumentContainer,
        query: &QuerySpec,
        sort_key: SortKey,
        ranges: Vec<Range>,
        config: StageConfig,
        cancel: &CancellationToken,
    ) -> crate::Result<OrderByStage<'a>> {
        config.validate()?;

        let engine = match &config.initial_token {
            Some(token) => {
                // Re-validates sort-value arity against `sort_key`, since a token built for a
                // different query can otherwise only be caught as an `InternalInvariant` deep
                // inside the comparator, not the `MalformedContinuation` S6 calls for.
                MergeToken::parse(&token.to_json(), sort_key.arity())?;
                MergeEngine::new_resumed(
                    container,
                    query,
                    sort_key,
                    ranges,
                    token,
                    config.effective_partition_page_size(),
                    cancel,
                )
                .await?
            }
            None => {
                MergeEngine::new_fresh(
                    container,
                    query,
                    sort_key,
                    ranges,
                    config.effective_partition_page_size(),
                    cancel,
                )
                .await?
            }
        };

        Ok(OrderByStage {
            engine,
            config,
            terminated: false,
        })
    }

    /// Pulls the next page: up to `config.max_page_size` results, or fewer if the stream ends
    /// first. Returns `EndOfStream` once the merge is complete; calling `advance()` again after
    /// that also returns `EndOfStream`, rather than panicking, to tolerate a caller that hasn't
    /// noticed yet.
    #[tracing::instrument(level = "debug", skip(self, cancel))]
    pub async fn advance(&mut self, cancel: &CancellationToken) -> crate::Result<StageOutcome> {
        if self.terminated {
            return Ok(StageOutcome::EndOfStream);
        }

        let mut results = Vec::new();
        let mut continuation_token = None;

        while results.len() < self.config.max_page_size as usize {
            match self.engine.next(cancel).await? {
                Some((result, token)) => {
                    results.push(result);
                    continuation_token = Some(token);
                }
                None => {
                    self.terminated = true;
                    continuation_token = None;
                    break;
                }
            }
        }

        if results.is_empty() {
            tracing::debug!("merge terminated with no further results");
            return Ok(StageOutcome::EndOfStream);
        }

        Ok(StageOutcome::Page(Page {
            results,
            continuation_token,
        }))
    }

    /// Whether the stream has terminated: the priority queue is empty and every cursor is
    /// exhausted (§4.G Termination).
    pub fn is_terminated(&self) -> bool {
        self.terminated || self.engine.is_terminated()
    }
}
