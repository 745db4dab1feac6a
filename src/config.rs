//! Stage configuration (component L).

use crate::{token::MergeToken, ErrorKind};

/// Configuration for an [`crate::stage::OrderByStage`] instance.
#[derive(Clone, Debug)]
pub struct StageConfig {
    /// The largest number of results a single [`crate::stage::Page`] may carry. Must be at
    /// least 1.
    pub max_page_size: u32,

    /// The continuation token to resume from, if any. `None` starts a fresh query.
    pub initial_token: Option<MergeToken>,

    /// The page size requested from each partition fetch. Defaults to `max_page_size` when
    /// unset, since there's rarely a reason for the stage to ask partitions for more than it
    /// can hand back in one page.
    pub partition_page_size: Option<u32>,
}

impl StageConfig {
    pub fn new(max_page_size: u32) -> Self {
        Self {
            max_page_size,
            initial_token: None,
            partition_page_size: None,
        }
    }

    pub fn with_initial_token(mut self, token: MergeToken) -> Self {
        self.initial_token = Some(token);
        self
    }

    pub fn with_partition_page_size(mut self, page_size: u32) -> Self {
        self.partition_page_size = Some(page_size);
        self
    }

    /// The page size to request from each partition fetch.
    pub fn effective_partition_page_size(&self) -> u32 {
        self.partition_page_size.unwrap_or(self.max_page_size)
    }

    /// Validates this configuration, matching the stage's invariant that it never emits a page
    /// larger than `max_page_size` nor an empty non-terminal page.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_page_size < 1 {
            return Err(ErrorKind::InternalInvariant
                .with_message("max_page_size must be at least 1"));
        }
        Ok(())
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self::new(100)
    }
}
