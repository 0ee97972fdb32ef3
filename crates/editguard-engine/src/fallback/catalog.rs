//! Ordered fallback catalog
//!
//! A static table of `(priority, predicate, action, rollback_on_failure)`
//! records, fixed once built. Lower priority runs first; equal priorities
//! keep registration order.

use async_trait::async_trait;
use editguard_core::clock::Clock;
use editguard_core::errors::{DataPreservation, EditGuardError, ErrorRecord, Result};
use editguard_core::model::ChangeSubmission;
use std::fmt;
use std::sync::Arc;

use super::stores::{LocalCache, MemoryStore};
use crate::apply::{AppliedSubmission, SubmissionApplier};
use crate::config::FallbackConfig;
use crate::time::Sleeper;

/// What the failed operation was trying to do
#[derive(Debug, Clone)]
pub struct FallbackRequest {
    pub operation_id: String,
    pub submission: ChangeSubmission,
}

/// Collaborators available to fallback actions
pub struct FallbackEnv {
    pub cache: Arc<LocalCache>,
    pub memory: Arc<MemoryStore>,
    /// Absent when the catalog is used without a kernel behind it
    pub applier: Option<Arc<dyn SubmissionApplier>>,
    pub sleeper: Arc<dyn Sleeper>,
    pub clock: Arc<dyn Clock>,
    pub config: FallbackConfig,
}

impl FallbackEnv {
    /// The applier, or an `EngineUnavailable` error naming the strategy
    ///
    /// # Errors
    ///
    /// Returns `EngineUnavailable` when no applier is wired in.
    pub fn require_applier(&self, strategy: &str) -> Result<&Arc<dyn SubmissionApplier>> {
        self.applier
            .as_ref()
            .ok_or_else(|| EditGuardError::EngineUnavailable {
                engine: format!("submission applier (needed by {})", strategy),
            })
    }
}

/// Input handed to a fallback action
pub struct FallbackInput<'a> {
    pub record: &'a ErrorRecord,
    pub request: &'a FallbackRequest,
    pub env: &'a FallbackEnv,
}

/// Successful fallback result
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackValue {
    pub strategy: String,
    /// Present when the fallback got the edits into document state
    pub applied: Option<AppliedSubmission>,
    pub preservation: DataPreservation,
    /// True when the result will not survive a restart
    pub lossy: bool,
    pub note: String,
}

#[async_trait]
pub trait FallbackAction: Send + Sync {
    async fn run(&self, input: &FallbackInput<'_>) -> Result<FallbackValue>;
}

pub type FallbackPredicate = fn(&ErrorRecord, &FallbackRequest) -> bool;

/// One catalog entry
#[derive(Clone)]
pub struct FallbackStrategy {
    pub name: String,
    pub priority: u32,
    pub predicate: FallbackPredicate,
    pub action: Arc<dyn FallbackAction>,
    /// A failed run leaves work that must be rolled back
    pub rollback_on_failure: bool,
}

impl FallbackStrategy {
    pub fn new(
        name: impl Into<String>,
        priority: u32,
        predicate: FallbackPredicate,
        action: Arc<dyn FallbackAction>,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            predicate,
            action,
            rollback_on_failure: false,
        }
    }

    pub fn rollback_on_failure(mut self, required: bool) -> Self {
        self.rollback_on_failure = required;
        self
    }

    pub fn matches(&self, record: &ErrorRecord, request: &FallbackRequest) -> bool {
        (self.predicate)(record, request)
    }
}

impl fmt::Debug for FallbackStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackStrategy")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("rollback_on_failure", &self.rollback_on_failure)
            .finish()
    }
}

/// Immutable, priority-ordered strategy table
#[derive(Debug, Clone, Default)]
pub struct FallbackCatalog {
    strategies: Vec<FallbackStrategy>,
}

impl FallbackCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// The six built-in strategies
    pub fn defaults() -> Self {
        Self::builder().with_defaults().build()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn strategies(&self) -> &[FallbackStrategy] {
        &self.strategies
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name.as_str()).collect()
    }

    /// Strategies whose predicate accepts the failure, in run order
    ///
    /// Evaluates predicates only; no action runs.
    pub fn matching(&self, record: &ErrorRecord, request: &FallbackRequest) -> Vec<&FallbackStrategy> {
        self.strategies
            .iter()
            .filter(|s| s.matches(record, request))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

/// Startup-time registration
#[derive(Default)]
pub struct CatalogBuilder {
    strategies: Vec<FallbackStrategy>,
}

impl CatalogBuilder {
    pub fn with_defaults(mut self) -> Self {
        for strategy in super::strategies::default_strategies() {
            self = self.register(strategy);
        }
        self
    }

    /// Add a strategy; a strategy with the same name is replaced
    pub fn register(mut self, strategy: FallbackStrategy) -> Self {
        self.strategies.retain(|s| s.name != strategy.name);
        self.strategies.push(strategy);
        self
    }

    pub fn remove(mut self, name: &str) -> Self {
        self.strategies.retain(|s| s.name != name);
        self
    }

    pub fn build(mut self) -> FallbackCatalog {
        // stable: equal priorities keep registration order
        self.strategies.sort_by_key(|s| s.priority);
        FallbackCatalog {
            strategies: self.strategies,
        }
    }
}
