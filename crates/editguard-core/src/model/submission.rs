use editguard_core_types::SubmissionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{EditGuardError, Result};

/// Optional description of how an automated producer generated the edits
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingContext {
    pub model: Option<String>,
    pub provider: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// One proposed text edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedEdit {
    pub original_text: String,
    pub proposed_text: String,
    pub rationale: Option<String>,
}

impl ProposedEdit {
    pub fn new(original: impl Into<String>, proposed: impl Into<String>) -> Self {
        Self {
            original_text: original.into(),
            proposed_text: proposed.into(),
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

/// ChangeSubmission - a producer-attributed batch of edits for one session
///
/// Consumed once by the pipeline and never mutated afterwards; retries and
/// fallbacks operate on clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSubmission {
    pub id: SubmissionId,
    pub producer: String,
    pub context: Option<ProcessingContext>,
    pub edits: Vec<ProposedEdit>,
    pub session_id: String,
    pub label: Option<String>,
}

impl ChangeSubmission {
    pub fn new(
        producer: impl Into<String>,
        session_id: impl Into<String>,
        edits: Vec<ProposedEdit>,
    ) -> Self {
        Self {
            id: SubmissionId::new(),
            producer: producer.into(),
            context: None,
            edits,
            session_id: session_id.into(),
            label: None,
        }
    }

    pub fn with_context(mut self, context: ProcessingContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Structural checks that need no document state
    ///
    /// # Errors
    ///
    /// Returns `InvalidSubmission` naming the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let reject = |reason: &str| {
            Err(EditGuardError::InvalidSubmission {
                reason: reason.to_string(),
            })
        };

        if self.producer.trim().is_empty() {
            return reject("producer is empty");
        }
        if self.session_id.trim().is_empty() {
            return reject("target session id is empty");
        }
        if self.edits.is_empty() {
            return reject("submission has no edits");
        }
        if let Some(index) = self
            .edits
            .iter()
            .position(|e| e.original_text.is_empty() && e.proposed_text.is_empty())
        {
            return reject(&format!("edit {} is empty", index));
        }
        Ok(())
    }
}
