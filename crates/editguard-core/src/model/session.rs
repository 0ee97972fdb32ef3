use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::change::Change;
use super::metadata::Metadata;

/// Lifecycle of a review session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Open,
    Reviewing,
    Closed,
}

/// Session - the unit of ownership for changes and batches
///
/// All mutation of a session happens inside a transaction holding that
/// session's lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,

    /// Document under review
    pub document_id: String,

    pub status: SessionStatus,

    /// Changes in creation order
    pub changes: Vec<Change>,

    /// Batches owned by this session, in creation order
    pub batch_ids: Vec<String>,

    /// Producer of the most recent applied submission
    pub last_producer: Option<String>,

    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The session fields an update-session operation may overwrite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFields {
    pub status: SessionStatus,
    pub batch_ids: Vec<String>,
    pub last_producer: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, document_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            document_id: document_id.into(),
            status: SessionStatus::Open,
            changes: Vec::new(),
            batch_ids: Vec::new(),
            last_producer: None,
            metadata: Metadata::new(),
            created_at: at,
            updated_at: at,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == SessionStatus::Closed
    }

    pub fn change(&self, change_id: &str) -> Option<&Change> {
        self.changes.iter().find(|c| c.id == change_id)
    }

    pub fn fields(&self) -> SessionFields {
        SessionFields {
            status: self.status,
            batch_ids: self.batch_ids.clone(),
            last_producer: self.last_producer.clone(),
            updated_at: self.updated_at,
        }
    }

    pub fn restore_fields(&mut self, fields: SessionFields) {
        self.status = fields.status;
        self.batch_ids = fields.batch_ids;
        self.last_producer = fields.last_producer;
        self.updated_at = fields.updated_at;
    }
}
