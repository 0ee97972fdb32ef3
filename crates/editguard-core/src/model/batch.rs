use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Batch - the group of changes created by one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Group identifier (UUID v7)
    pub group_id: String,

    /// Owning session
    pub session_id: String,

    /// Member change ids, in submission order
    pub change_ids: Vec<String>,

    pub producer: String,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(
        group_id: String,
        session_id: &str,
        producer: &str,
        change_ids: Vec<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            group_id,
            session_id: session_id.to_string(),
            change_ids,
            producer: producer.to_string(),
            label: None,
            created_at: at,
        }
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    pub fn contains(&self, change_id: &str) -> bool {
        self.change_ids.iter().any(|id| id == change_id)
    }
}
