//! Cross-partition `ORDER BY` query execution for a distributed document database client.
//!
//! This crate implements one stage of a cross-partition query pipeline: given a query already
//! rewritten per-partition by a gateway (so each partition's result stream is itself sorted),
//! it merges those streams into a single globally-sorted stream, handles partition splits
//! transparently, and can resume from a continuation token after a restart with no duplicate
//! or missing rows.
//!
//! Transport (how a partition is actually fetched), query planning (how the original query
//! was rewritten into per-partition text), and any other query shapes (aggregates, non-order-by
//! cross-partition queries) are out of scope; see [`cursor::DocumentContainer`] for the seam
//! this crate expects its host to provide.

#![cfg_attr(not(debug_assertions), deny(warnings))]

mod error;

pub use error::{Error, ErrorKind, Result};

pub mod config;
pub mod cursor;
pub mod filter;
pub mod merge;
pub mod partition_map;
pub mod query_spec;
pub mod range;
pub mod resume;
pub mod rid;
pub mod stage;
pub mod token;
pub mod value;

pub use config::StageConfig;
pub use cursor::DocumentContainer;
pub use query_spec::{OrderByItem, OrderByResult, QuerySpec, SortKey, SortOrder};
pub use range::Range;
pub use rid::ResourceId;
pub use stage::{OrderByStage, StageOutcome};
pub use token::MergeToken;
pub use value::Value;

/// Re-exported so hosts implementing [`DocumentContainer`] and callers of [`OrderByStage::new`]
/// and [`OrderByStage::advance`] don't need to depend on `tokio-util` themselves just to name
/// the type this crate's cancellation signal (§5) is expressed with.
pub use tokio_util::sync::CancellationToken;
