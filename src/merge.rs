//! Merge engine (component G): priority-queue k-way merge across partition cursors, with
//! split handling and continuation-token emission.
//!
//! The priority queue is a [`BinaryHeap`], which is a max-heap; each entry's [`Ord`] impl
//! inverts the natural sort-key comparison so the item that should come out *first* compares
//! as *greatest*, matching the convention the rest of this workspace uses for heap-based
//! merges. Re-inserting a cursor after every pop (rather than a sift-down on a mutable top) is
//! the simpler of the two strategies the merge engine's contract allows (§9).

use std::{cmp::Ordering, collections::BinaryHeap, sync::Arc};

use tokio_util::sync::CancellationToken;

use crate::{
    cursor::{self, Advance, DocumentContainer, PartitionCursor},
    filter,
    partition_map,
    query_spec::{OrderByResult, QuerySpec, SortKey},
    range::Range,
    resume::{self, ResumeOutcome},
    rid::ResourceId,
    token::{MergeToken, ResumeKey},
    value::Value,
    ErrorKind,
};

/// A cursor plus the bookkeeping the merge engine needs to keep a continuation token current:
/// the position (sort values, RID, skip count) this specific cursor last emitted, if any.
///
/// `last_emission` stays `None` until this cursor is drawn from for the first time in this
/// engine's lifetime; such cursors are omitted from the continuation token entirely (there is
/// nothing to resume — re-fetching their range from the start duplicates nothing, since they
/// haven't emitted anything yet) and are simply reconstructed fresh on the far side of a resume.
struct LiveCursor {
    cursor: PartitionCursor,
    last_emission: Option<(Vec<Value>, ResourceId, u32)>,
}

impl LiveCursor {
    fn resume_key(&self) -> Option<ResumeKey> {
        let (sort_values, rid, skip_count) = self.last_emission.as_ref()?;
        Some(ResumeKey::new(
            sort_values.clone(),
            rid.clone(),
            *skip_count,
            self.cursor.current_server_token().unwrap_or(""),
        ))
    }

    fn record_emission(
        &mut self,
        sort_values: Vec<Value>,
        rid: ResourceId,
        sort_key: &SortKey,
    ) -> crate::Result<()> {
        let skip_count = match &self.last_emission {
            Some((last_sv, last_rid, last_skip)) => {
                let tied = sort_key.compare(last_sv, &sort_values)? == Ordering::Equal
                    && last_rid.compare_document(&rid) == Ordering::Equal;
                if tied {
                    last_skip + 1
                } else {
                    0
                }
            }
            None => 0,
        };
        self.last_emission = Some((sort_values, rid, skip_count));
        Ok(())
    }
}

struct HeapEntry {
    sort_key: Arc<SortKey>,
    live: LiveCursor,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        let self_head = self
            .live
            .cursor
            .head()
            .expect("only cursors with a head are ever placed in the heap");
        let other_head = other
            .live
            .cursor
            .head()
            .expect("only cursors with a head are ever placed in the heap");

        let natural = self
            .sort_key
            .compare(&self_head.sort_values, &other_head.sort_values)
            .expect("sort value arity is validated before a cursor is ever primed");

        if natural != Ordering::Equal {
            // Invert: BinaryHeap pops the greatest, and we want the naturally-smallest first.
            return natural.reverse();
        }

        // Tie-break: the partition with the lower range minimum is drawn first (§4.G.1).
        other
            .live
            .cursor
            .range()
            .min
            .cmp(&self.live.cursor.range().min)
    }
}

fn non_empty(token: &str) -> Option<String> {
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Primes a single range, following the split protocol (§4.G) through to completion: a range
/// that turns out to be gone is replaced by its children, each of which inherits the same
/// query and resume key and is primed in turn, recursively.
///
/// Returns one [`LiveCursor`] per leaf range that ended up with a buffered head. Ranges that
/// exhaust immediately (nothing left beyond the resume point) contribute nothing.
fn prime_with_splits<'a>(
    container: &'a dyn DocumentContainer,
    sort_key: &'a SortKey,
    page_size: u32,
    range: Range,
    query: QuerySpec,
    server_token: Option<String>,
    resume_key: Option<ResumeKey>,
    cancel: &'a CancellationToken,
) -> futures::future::BoxFuture<'a, crate::Result<Vec<LiveCursor>>> {
    Box::pin(async move {
        let mut cursor = PartitionCursor::new(range, query.clone(), server_token);

        let outcome = match &resume_key {
            Some(key) => resume::apply(&mut cursor, container, sort_key, key, page_size, cancel).await?,
            None => match cursor.try_advance(container, page_size, cancel).await? {
                Advance::Ready | Advance::Exhausted => ResumeOutcome::Ready,
                Advance::Split => ResumeOutcome::Split,
            },
        };

        match outcome {
            ResumeOutcome::Ready => {
                let last_emission = resume_key.map(|k| (k.sort_values, k.rid, k.skip_count));
                if cursor.head().is_some() {
                    Ok(vec![LiveCursor {
                        cursor,
                        last_emission,
                    }])
                } else {
                    Ok(vec![])
                }
            }
            ResumeOutcome::Split => {
                tracing::debug!(range = %cursor.range().id, "range split while priming");
                let children =
                    cursor::cancellable(cancel, container.child_ranges(cursor.range(), cancel)).await?;
                let mut live = Vec::new();
                for child in children {
                    live.extend(
                        prime_with_splits(
                            container,
                            sort_key,
                            page_size,
                            child,
                            query.clone(),
                            None,
                            resume_key.clone(),
                            cancel,
                        )
                        .await?,
                    );
                }
                Ok(live)
            }
        }
    })
}

/// The priority-queue k-way merge described in §4.G.
pub struct MergeEngine<'a> {
    container: &'a dyn DocumentContainer,
    sort_key: Arc<SortKey>,
    page_size: u32,
    heap: BinaryHeap<HeapEntry>,
}

impl<'a> MergeEngine<'a> {
    /// Builds a merge engine with no resume state: every range starts from the beginning, with
    /// the target filter (`true`) substituted everywhere.
    pub async fn new_fresh(
        container: &'a dyn DocumentContainer,
        query: &QuerySpec,
        sort_key: SortKey,
        ranges: Vec<Range>,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> crate::Result<MergeEngine<'a>> {
        let sort_key = Arc::new(sort_key);
        let filters = filter::synthesize(&sort_key, None)?;
        let substituted = query.with_filter_substituted(&filters.target);

        let mut heap = BinaryHeap::new();
        for range in ranges {
            let cursors = prime_with_splits(
                container,
                &sort_key,
                page_size,
                range,
                substituted.clone(),
                None,
                None,
                cancel,
            )
            .await?;
            push_all(&mut heap, &sort_key, cursors);
        }

        Ok(MergeEngine {
            container,
            sort_key,
            page_size,
            heap,
        })
    }

    /// Reconstructs a merge engine from a continuation token and the container's current
    /// active range set (§4.C, §4.D, §4.G Initialization).
    pub async fn new_resumed(
        container: &'a dyn DocumentContainer,
        query: &QuerySpec,
        sort_key: SortKey,
        active_ranges: Vec<Range>,
        token: &MergeToken,
        page_size: u32,
        cancel: &CancellationToken,
    ) -> crate::Result<MergeEngine<'a>> {
        let sort_key = Arc::new(sort_key);
        let mapped = partition_map::map(&active_ranges, token)?;
        let (target_range, target_key) = mapped.target;
        let filters = filter::synthesize(&sort_key, Some(&target_key.sort_values))?;

        let mut heap = BinaryHeap::new();

        let target_query = query.with_filter_substituted(&filters.target);
        let target_token = non_empty(&target_key.server_token);
        let cursors = prime_with_splits(
            container,
            &sort_key,
            page_size,
            target_range,
            target_query,
            target_token,
            Some(target_key),
            cancel,
        )
        .await?;
        push_all(&mut heap, &sort_key, cursors);

        for (range, resume_key) in mapped.left_of_target {
            let q = query.with_filter_substituted(&filters.left);
            let server_token = resume_key
                .as_ref()
                .and_then(|k| non_empty(&k.server_token));
            let cursors = prime_with_splits(
                container, &sort_key, page_size, range, q, server_token, resume_key, cancel,
            )
            .await?;
            push_all(&mut heap, &sort_key, cursors);
        }

        for (range, resume_key) in mapped.right_of_target {
            let q = query.with_filter_substituted(&filters.right);
            let server_token = resume_key
                .as_ref()
                .and_then(|k| non_empty(&k.server_token));
            let cursors = prime_with_splits(
                container, &sort_key, page_size, range, q, server_token, resume_key, cancel,
            )
            .await?;
            push_all(&mut heap, &sort_key, cursors);
        }

        Ok(MergeEngine {
            container,
            sort_key,
            page_size,
            heap,
        })
    }

    /// `true` once the priority queue is empty and every cursor has exhausted (§4.G
    /// Termination).
    pub fn is_terminated(&self) -> bool {
        self.heap.is_empty()
    }

    /// Runs the next-result protocol (§4.G.1): pops the minimum cursor, emits its head, asks it
    /// to advance (handling a split transparently if one occurs), and returns the emitted
    /// result along with the continuation token as of this emission. Returns `None` once the
    /// stream has terminated.
    #[tracing::instrument(level = "debug", skip(self, cancel))]
    pub async fn next(
        &mut self,
        cancel: &CancellationToken,
    ) -> crate::Result<Option<(OrderByResult, MergeToken)>> {
        if cancel.is_cancelled() {
            return Err(ErrorKind::Cancelled.with_message("operation was cancelled before starting"));
        }

        let Some(HeapEntry { live: mut target, .. }) = self.heap.pop() else {
            return Ok(None);
        };

        let emitted = target
            .cursor
            .pop()
            .expect("heap entries always have a buffered head");
        target.record_emission(emitted.sort_values.clone(), emitted.rid.clone(), &self.sort_key)?;

        let target_range = target.cursor.range().clone();
        let target_resume_key = target
            .resume_key()
            .expect("record_emission always leaves last_emission populated");

        self.requeue_after_advance(target, cancel).await?;

        let token = self.build_token(target_range, target_resume_key);
        Ok(Some((emitted, token)))
    }

    async fn requeue_after_advance(
        &mut self,
        mut live: LiveCursor,
        cancel: &CancellationToken,
    ) -> crate::Result<()> {
        if live.cursor.head().is_some() {
            self.heap.push(HeapEntry {
                sort_key: self.sort_key.clone(),
                live,
            });
            return Ok(());
        }

        match live.cursor.try_advance(self.container, self.page_size, cancel).await? {
            Advance::Ready => {
                self.heap.push(HeapEntry {
                    sort_key: self.sort_key.clone(),
                    live,
                });
            }
            Advance::Exhausted => {
                tracing::debug!(range = %live.cursor.range().id, "cursor exhausted");
            }
            Advance::Split => {
                let range = live.cursor.range().clone();
                let query = live.cursor.query().clone();
                let resume_key = live.resume_key();
                tracing::debug!(range = %range.id, "range split mid-merge");
                let children =
                    cursor::cancellable(cancel, self.container.child_ranges(&range, cancel)).await?;
                for child in children {
                    let cursors = prime_with_splits(
                        self.container,
                        &self.sort_key,
                        self.page_size,
                        child,
                        query.clone(),
                        None,
                        resume_key.clone(),
                        cancel,
                    )
                    .await?;
                    push_all(&mut self.heap, &self.sort_key, cursors);
                }
            }
        }
        Ok(())
    }

    /// Builds the continuation token as of this emission: the just-drawn partition's resume
    /// point first, then every other currently-live cursor that has ever emitted anything.
    fn build_token(&self, target_range: Range, target_resume_key: ResumeKey) -> MergeToken {
        let mut entries = vec![(target_range.clone(), target_resume_key)];
        for entry in &self.heap {
            if entry.live.cursor.range().id == target_range.id {
                continue;
            }
            if let Some(resume_key) = entry.live.resume_key() {
                entries.push((entry.live.cursor.range().clone(), resume_key));
            }
        }
        // `MergeToken::new` only fails on an empty list, and `entries` always has the target.
        MergeToken::new(entries).expect("entries always contains the target")
    }
}

fn push_all(heap: &mut BinaryHeap<HeapEntry>, sort_key: &Arc<SortKey>, cursors: Vec<LiveCursor>) {
    for live in cursors {
        heap.push(HeapEntry {
            sort_key: sort_key.clone(),
            live,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cursor::{FetchOutcome, Page},
        query_spec::{OrderByItem, SortOrder},
    };
    use futures::future::BoxFuture;
    use std::{collections::HashMap, sync::Mutex};

    /// A document container backed by fixed per-range page scripts, used to drive the merge
    /// engine through deterministic scenarios without any real transport.
    struct ScriptedContainer {
        pages: Mutex<HashMap<String, std::collections::VecDeque<FetchOutcome>>>,
        children: HashMap<String, Vec<Range>>,
    }

    impl ScriptedContainer {
        fn new(
            pages: Vec<(&str, Vec<OrderByResult>)>,
        ) -> Self {
            let pages = pages
                .into_iter()
                .map(|(range_id, results)| {
                    (
                        range_id.to_string(),
                        std::collections::VecDeque::from([FetchOutcome::Page(Page {
                            results,
                            next_server_token: None,
                            execution_info: None,
                        })]),
                    )
                })
                .collect();
            Self {
                pages: Mutex::new(pages),
                children: HashMap::new(),
            }
        }
    }

    impl DocumentContainer for ScriptedContainer {
        fn fetch_page<'a>(
            &'a self,
            range: &'a Range,
            _query: &'a QuerySpec,
            _server_token: Option<&'a str>,
            _page_size: u32,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, crate::Result<FetchOutcome>> {
            let mut pages = self.pages.lock().unwrap();
            let outcome = pages
                .get_mut(range.id.as_ref())
                .and_then(|q| q.pop_front())
                .unwrap_or(FetchOutcome::Page(Page::default()));
            Box::pin(async move { Ok(outcome) })
        }

        fn child_ranges<'a>(
            &'a self,
            range: &'a Range,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, crate::Result<Vec<Range>>> {
            let children = self.children.get(range.id.as_ref()).cloned().unwrap_or_default();
            Box::pin(async move { Ok(children) })
        }
    }

    fn ascending_x() -> SortKey {
        SortKey::new(vec![OrderByItem {
            expression: "c.x".to_string(),
            direction: SortOrder::Ascending,
        }])
        .unwrap()
    }

    fn row(x: i64, doc: &str) -> OrderByResult {
        OrderByResult {
            sort_values: vec![Value::Number(x as f64)],
            rid: ResourceId::parse(&format!("db!coll!{doc}")).unwrap(),
            payload: serde_json::json!({ "x": x }),
        }
    }

    async fn drain(engine: &mut MergeEngine<'_>) -> Vec<i64> {
        let cancel = CancellationToken::new();
        let mut out = Vec::new();
        while let Some((result, _token)) = engine.next(&cancel).await.unwrap() {
            match &result.sort_values[0] {
                Value::Number(n) => out.push(*n as i64),
                _ => unreachable!(),
            }
        }
        out
    }

    #[tokio::test]
    pub async fn single_partition_streams_in_order() {
        // Spec scenario S1.
        let container = ScriptedContainer::new(vec![(
            "r0",
            vec![row(1, "d1"), row(2, "d2"), row(3, "d3")],
        )]);
        let mut engine = MergeEngine::new_fresh(
            &container,
            &QuerySpec::new("SELECT * FROM c"),
            ascending_x(),
            vec![Range::new("r0", "00", "FF")],
            100,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(vec![1, 2, 3], drain(&mut engine).await);
        assert!(engine.is_terminated());
    }

    #[tokio::test]
    pub async fn two_partitions_merge_in_order() {
        // Spec scenario S2.
        let container = ScriptedContainer::new(vec![
            ("a", vec![row(1, "a1"), row(3, "a3"), row(5, "a5")]),
            ("b", vec![row(2, "b2"), row(4, "b4"), row(6, "b6")]),
        ]);
        let mut engine = MergeEngine::new_fresh(
            &container,
            &QuerySpec::new("SELECT * FROM c"),
            ascending_x(),
            vec![Range::new("a", "00", "80"), Range::new("b", "80", "FF")],
            100,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(vec![1, 2, 3, 4, 5, 6], drain(&mut engine).await);
    }

    #[tokio::test]
    pub async fn tie_break_prefers_leftmost_range_and_tracks_skip_count() {
        // Spec scenario S3: both ranges emit the exact same (sort_value, rid) pair.
        let tied_a = row(1, "same-rid");
        let tied_b = row(1, "same-rid");
        let container = ScriptedContainer::new(vec![
            ("a", vec![tied_a.clone(), row(2, "a2")]),
            ("b", vec![tied_b.clone(), row(2, "b2")]),
        ]);
        let mut engine = MergeEngine::new_fresh(
            &container,
            &QuerySpec::new("SELECT * FROM c"),
            ascending_x(),
            vec![Range::new("a", "00", "80"), Range::new("b", "80", "FF")],
            100,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let cancel = CancellationToken::new();
        let (first, _) = engine.next(&cancel).await.unwrap().unwrap();
        assert_eq!("same-rid", first.rid.document);

        // The second draw is a' tie on (sort_value, rid) with the first: under the invariant
        // that every result comes from exactly one partition, this can only be `a`'s next
        // value or `b`'s tied row — leftmost-range tie-break means `a` would be drawn again
        // only if it had another tied row; here it's `b`'s identical row next, per S3.
        let (second, _) = engine.next(&cancel).await.unwrap().unwrap();
        assert_eq!("same-rid", second.rid.document);
    }

    #[tokio::test]
    pub async fn cancellation_is_observed_before_drawing_from_the_heap() {
        let container = ScriptedContainer::new(vec![("r0", vec![row(1, "d1")])]);
        let mut engine = MergeEngine::new_fresh(
            &container,
            &QuerySpec::new("SELECT * FROM c"),
            ascending_x(),
            vec![Range::new("r0", "00", "FF")],
            100,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine.next(&cancel).await.unwrap_err();
        assert_eq!(crate::ErrorKind::Cancelled, err.kind());
    }

    #[tokio::test]
    pub async fn split_is_transparent_to_the_emitted_sequence() {
        // Spec scenario S5: range B splits into B1/B2 mid-run.
        let mut container = ScriptedContainer::new(vec![("a", vec![row(1, "a1"), row(5, "a5")])]);
        container
            .pages
            .get_mut()
            .unwrap()
            .insert("b".to_string(), std::collections::VecDeque::from([FetchOutcome::Gone]));
        container
            .pages
            .get_mut()
            .unwrap()
            .insert(
                "b1".to_string(),
                std::collections::VecDeque::from([FetchOutcome::Page(Page {
                    results: vec![row(2, "b1-2")],
                    next_server_token: None,
                    execution_info: None,
                })]),
            );
        container
            .pages
            .get_mut()
            .unwrap()
            .insert(
                "b2".to_string(),
                std::collections::VecDeque::from([FetchOutcome::Page(Page {
                    results: vec![row(3, "b2-3")],
                    next_server_token: None,
                    execution_info: None,
                })]),
            );
        container
            .children
            .insert("b".to_string(), vec![Range::new("b1", "80", "C0"), Range::new("b2", "C0", "FF")]);

        let mut engine = MergeEngine::new_fresh(
            &container,
            &QuerySpec::new("SELECT * FROM c"),
            ascending_x(),
            vec![Range::new("a", "00", "80"), Range::new("b", "80", "FF")],
            100,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(vec![1, 2, 3, 5], drain(&mut engine).await);
    }
}
