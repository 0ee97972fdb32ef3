//! Retry & Fallback Engine

pub mod backoff;
pub mod context;
pub mod engine;

pub use backoff::{expected_delay, jittered_delay};
pub use context::{AttemptOutcome, AttemptRecord, RetryContext, RetryStats, RetryStatus};
pub use engine::{FallbackFailure, Resolution, RetryEngine, RetryResult};
