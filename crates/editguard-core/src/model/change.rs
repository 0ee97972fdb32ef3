use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::submission::ProposedEdit;

/// Review status of a single change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Change - one proposed edit recorded against a session
///
/// `word_count` and `char_count` are derived from `proposed_text` when the
/// change is created and are re-checked by integrity verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Unique identifier across the whole document state (UUID v7)
    pub id: String,

    /// Owning session; must equal the id of the session holding this change
    pub session_id: String,

    /// Batch this change was submitted in, if any
    pub batch_id: Option<String>,

    /// Attribution of whoever produced the edit
    pub producer: String,

    pub original_text: String,
    pub proposed_text: String,
    pub rationale: Option<String>,

    pub status: ChangeStatus,

    pub word_count: usize,
    pub char_count: usize,

    pub created_at: DateTime<Utc>,
}

impl Change {
    /// Build a pending change from a proposed edit
    pub fn from_edit(
        id: String,
        session_id: &str,
        producer: &str,
        edit: &ProposedEdit,
        at: DateTime<Utc>,
    ) -> Self {
        let (word_count, char_count) = text_counts(&edit.proposed_text);
        Self {
            id,
            session_id: session_id.to_string(),
            batch_id: None,
            producer: producer.to_string(),
            original_text: edit.original_text.clone(),
            proposed_text: edit.proposed_text.clone(),
            rationale: edit.rationale.clone(),
            status: ChangeStatus::Pending,
            word_count,
            char_count,
            created_at: at,
        }
    }

    /// Recompute the derived counts from the proposed text
    pub fn recount(&mut self) {
        let (words, chars) = text_counts(&self.proposed_text);
        self.word_count = words;
        self.char_count = chars;
    }
}

/// Whitespace-separated word count and Unicode scalar count
pub fn text_counts(text: &str) -> (usize, usize) {
    (text.split_whitespace().count(), text.chars().count())
}
