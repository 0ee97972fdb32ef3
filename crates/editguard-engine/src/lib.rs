//! EditGuard Engine - async recovery pipeline for change submissions
//!
//! Builds on the synchronous kernel in `editguard-core`:
//! - Retry & Fallback Engine (exponential backoff with jitter, ordered catalog)
//! - Per-session locking and atomic application through the Transaction Manager
//! - Pluggable change processing and persistence
//! - Integrity passes over a consistent view, on demand or periodically
//! - Layered configuration (defaults, TOML file, environment)

pub mod apply;
pub mod config;
pub mod fallback;
pub mod locks;
pub mod persistence;
pub mod pipeline;
pub mod processor;
pub mod retry;
pub mod time;

// Re-export commonly used types
pub use apply::{AppliedSubmission, ApplyMode, ChangeOutcome, ChangeStatusOutcome, SubmissionApplier};
pub use config::{EngineConfig, FallbackConfig, RetryConfig, VerificationConfig};
pub use fallback::{FallbackCatalog, FallbackStrategy, LocalCache, MemoryStore};
pub use persistence::{FilePersistence, InMemoryPersistence, Persistence};
pub use pipeline::{
    CancelOutcome, HousekeepingReport, PipelineBuilder, SubmissionPipeline, SubmissionResult,
};
pub use processor::{ChangeProcessor, PassthroughProcessor};
pub use retry::{RetryEngine, RetryResult, RetryStats};
pub use time::{FixedJitter, JitterSource, RandomJitter, Sleeper, TokioSleeper, VirtualSleeper};
