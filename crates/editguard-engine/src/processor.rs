//! Change processor seam
//!
//! Turns a submission's proposed edits into change records. External
//! processors may be unavailable; the direct-processing fallback then uses
//! [`direct_changes`] instead.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use editguard_core::errors::Result;
use editguard_core::model::{Change, ChangeSubmission};

#[async_trait]
pub trait ChangeProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Produce one change per edit, in edit order
    async fn process(&self, submission: &ChangeSubmission, at: DateTime<Utc>) -> Result<Vec<Change>>;
}

/// Built-in conversion with fresh time-ordered change ids
pub fn direct_changes(submission: &ChangeSubmission, at: DateTime<Utc>) -> Vec<Change> {
    submission
        .edits
        .iter()
        .map(|edit| {
            Change::from_edit(
                uuid::Uuid::now_v7().to_string(),
                &submission.session_id,
                &submission.producer,
                edit,
                at,
            )
        })
        .collect()
}

/// Processor that applies edits verbatim
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughProcessor;

#[async_trait]
impl ChangeProcessor for PassthroughProcessor {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn process(&self, submission: &ChangeSubmission, at: DateTime<Utc>) -> Result<Vec<Change>> {
        Ok(direct_changes(submission, at))
    }
}
