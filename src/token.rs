//! The continuation token model (component B).
//!
//! A merge token is a non-empty JSON array of per-partition resume keys. The first element
//! always names the *target* partition — the one the client was drawing from when the
//! previous page ended — so that on resume the merge engine knows unambiguously which
//! partition to treat as already-positioned versus which ones merely carry a server token.
//!
//! Each entry records the full range (id, min, max) it was captured for, not just the id.
//! The partition mapper (`crate::partition_map`) needs the target's bounds to recover from a
//! partition merge that happened between persisting the token and reconstructing the stage
//! (see its module docs for the exact fallback rule).

use crate::{range::Range, rid::ResourceId, value::Value, ErrorKind};

/// Per-partition resume state, as captured in one element of a continuation token.
#[derive(Clone, Debug)]
pub struct ResumeKey {
    pub sort_values: Vec<Value>,
    pub rid: ResourceId,
    pub skip_count: u32,
    pub server_token: String,
}

impl ResumeKey {
    pub fn new(
        sort_values: Vec<Value>,
        rid: ResourceId,
        skip_count: u32,
        server_token: impl Into<String>,
    ) -> Self {
        Self {
            sort_values,
            rid,
            skip_count,
            server_token: server_token.into(),
        }
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "sortValues": self.sort_values.iter().map(Value::to_json).collect::<Vec<_>>(),
            "rid": self.rid.to_raw(),
            "skipCount": self.skip_count,
            "serverToken": self.server_token,
        })
    }

    fn from_json(json: &serde_json::Value, sort_key_arity: usize) -> crate::Result<ResumeKey> {
        let obj = json.as_object().ok_or_else(|| {
            ErrorKind::MalformedContinuation.with_message("resume key must be a JSON object")
        })?;

        let sort_values = obj
            .get("sortValues")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                ErrorKind::MalformedContinuation
                    .with_message("resume key is missing a 'sortValues' array")
            })?
            .iter()
            .map(Value::from_json)
            .collect::<Vec<_>>();

        if sort_values.len() != sort_key_arity {
            return Err(ErrorKind::MalformedContinuation.with_message(format!(
                "resume key has {} sort values, but the query's sort key has arity {}",
                sort_values.len(),
                sort_key_arity
            )));
        }

        let rid_raw = obj.get("rid").and_then(|v| v.as_str()).ok_or_else(|| {
            ErrorKind::MalformedContinuation.with_message("resume key is missing a 'rid' string")
        })?;
        let rid = ResourceId::parse(rid_raw)?;

        let skip_count = obj
            .get("skipCount")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| {
                ErrorKind::MalformedContinuation
                    .with_message("resume key is missing a numeric 'skipCount'")
            })? as u32;

        let server_token = obj
            .get("serverToken")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                ErrorKind::MalformedContinuation
                    .with_message("resume key is missing a 'serverToken' string")
            })?
            .to_string();

        Ok(ResumeKey {
            sort_values,
            rid,
            skip_count,
            server_token,
        })
    }
}

/// The global continuation token: a non-empty ordered list of `(range, resume_key)` pairs,
/// the first of which names the target partition.
#[derive(Clone, Debug)]
pub struct MergeToken {
    entries: Vec<(Range, ResumeKey)>,
}

impl MergeToken {
    /// Builds a token from `(range, resume_key)` pairs. `entries[0]` is the target partition.
    pub fn new(entries: Vec<(Range, ResumeKey)>) -> crate::Result<MergeToken> {
        if entries.is_empty() {
            return Err(
                ErrorKind::MalformedContinuation.with_message("a merge token must not be empty")
            );
        }
        Ok(MergeToken { entries })
    }

    /// The target partition's range and resume key: `entries[0]`.
    pub fn target(&self) -> &(Range, ResumeKey) {
        &self.entries[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Range, ResumeKey)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, range_id: &str) -> Option<&ResumeKey> {
        self.entries
            .iter()
            .find(|(range, _)| range.id == range_id)
            .map(|(_, key)| key)
    }

    /// Serializes this token to the JSON array form described in §3/§6.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(
            self.entries
                .iter()
                .map(|(range, key)| {
                    let mut obj = key.to_json();
                    let map = obj
                        .as_object_mut()
                        .expect("ResumeKey::to_json always returns an object");
                    map.insert(
                        "range".to_string(),
                        serde_json::json!({
                            "id": range.id,
                            "min": range.min,
                            "max": range.max,
                        }),
                    );
                    obj
                })
                .collect(),
        )
    }

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    /// Parses a continuation token previously produced by [`MergeToken::to_json`].
    ///
    /// Fails with `MalformedContinuation` when: the JSON isn't an array; the array is empty;
    /// any element's `sortValues` length disagrees with `sort_key_arity`; any `rid` fails to
    /// parse; or the shape otherwise doesn't match.
    #[tracing::instrument(level = "debug", skip(json), fields(sort_key_arity))]
    pub fn parse(json: &serde_json::Value, sort_key_arity: usize) -> crate::Result<MergeToken> {
        let array = json.as_array().ok_or_else(|| {
            tracing::warn!("continuation token is not a JSON array");
            ErrorKind::MalformedContinuation.with_message("continuation token must be a JSON array")
        })?;

        if array.is_empty() {
            tracing::warn!("continuation token is an empty array");
            return Err(ErrorKind::MalformedContinuation
                .with_message("continuation token must not be an empty array"));
        }

        let entries = array
            .iter()
            .map(|element| {
                let range_obj = element
                    .as_object()
                    .and_then(|obj| obj.get("range"))
                    .and_then(|v| v.as_object())
                    .ok_or_else(|| {
                        ErrorKind::MalformedContinuation
                            .with_message("resume key is missing a 'range' object")
                    })?;
                let field = |name: &'static str| {
                    range_obj.get(name).and_then(|v| v.as_str()).ok_or_else(|| {
                        ErrorKind::MalformedContinuation
                            .with_message(format!("range is missing a '{name}' string"))
                    })
                };
                let range = Range::new(field("id")?.to_string(), field("min")?, field("max")?);
                let key = ResumeKey::from_json(element, sort_key_arity)?;
                Ok((range, key))
            })
            .collect::<crate::Result<Vec<_>>>()
            .map_err(|e| {
                tracing::warn!(error = %e, "continuation token entry failed to parse");
                e
            })?;

        tracing::debug!(entries = entries.len(), "parsed continuation token");
        Ok(MergeToken { entries })
    }

    pub fn parse_str(raw: &str, sort_key_arity: usize) -> crate::Result<MergeToken> {
        let json: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| ErrorKind::MalformedContinuation.with_source(e))?;
        Self::parse(&json, sort_key_arity)
    }
}
