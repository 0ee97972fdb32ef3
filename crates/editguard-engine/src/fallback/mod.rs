//! Fallback strategies tried after retries are exhausted

pub mod catalog;
pub mod stores;
pub mod strategies;

pub use catalog::{
    CatalogBuilder, FallbackAction, FallbackCatalog, FallbackEnv, FallbackInput, FallbackPredicate,
    FallbackRequest, FallbackStrategy, FallbackValue,
};
pub use stores::{CachedSubmission, LocalCache, MemoryStore};
pub use strategies::{default_strategies, sanitize};
