//! Engine configuration
//!
//! Every section is optional in TOML; missing keys keep their defaults.
//!
//! ```toml
//! [retry]
//! max_retries = 5
//! base_delay_ms = 250
//!
//! [verification]
//! interval_secs = 600
//! deep = true
//! ```

use editguard_core::config::{ErrorLogConfig, IntegrityConfig, SnapshotConfig, TransactionConfig};
use editguard_core::errors::{EditGuardError, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Environment variable naming a TOML config file for [`EngineConfig::load`]
pub const CONFIG_ENV_VAR: &str = "EDITGUARD_CONFIG";

/// Backoff and retry eligibility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Perturb each delay by up to ±10%
    pub jitter: bool,
    pub retryable_kinds: BTreeSet<ErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
            retryable_kinds: [
                ErrorKind::Network,
                ErrorKind::Storage,
                ErrorKind::EngineUnavailable,
                ErrorKind::RateLimiting,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryConfig {
    /// Whether a classified kind may be re-attempted under this config
    pub fn allows(&self, kind: ErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }
}

/// Fallback catalog tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Wait used by extended-backoff before its single re-attempt
    pub extended_backoff_ms: u64,
    /// Upper bound on the extended-backoff wait
    pub extended_backoff_cap_ms: u64,
    /// Cached submissions kept by cache-locally
    pub cache_capacity: usize,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            extended_backoff_ms: 10_000,
            extended_backoff_cap_ms: 30_000,
            cache_capacity: 256,
        }
    }
}

/// Periodic background work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Seconds between integrity passes; `None` disables the task
    pub interval_secs: Option<u64>,
    pub deep: bool,
    pub repair: bool,
    /// How long a finished retry context stays queryable
    pub retry_context_grace_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            interval_secs: None,
            deep: false,
            repair: false,
            retry_context_grace_secs: 60,
        }
    }
}

/// Top-level configuration for a submission pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub fallback: FallbackConfig,
    pub verification: VerificationConfig,
    pub transaction: TransactionConfig,
    pub snapshot: SnapshotConfig,
    pub error_log: ErrorLogConfig,
    pub integrity: IntegrityConfig,
}

impl EngineConfig {
    /// Parse from TOML text
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the text is not valid TOML for this shape.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EditGuardError::Configuration {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `Configuration` if invalid.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).map_err(|e| EditGuardError::io("read_config", e))?;
        Self::from_toml_str(&text)
    }

    /// Load from the file named by `EDITGUARD_CONFIG`, or use defaults
    ///
    /// # Errors
    ///
    /// Returns the file's read or parse error when the variable is set.
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => {
                tracing::info!(path = ?path, "loading engine config");
                Self::from_file(Path::new(&path))
            }
            None => Ok(Self::default()),
        }
    }

    /// Reject values that would break backoff or ring invariants
    ///
    /// # Errors
    ///
    /// Returns `Configuration` naming the offending key.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(EditGuardError::Configuration {
                message: message.to_string(),
            })
        };
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return invalid("retry.backoff_multiplier must be a finite number >= 1.0");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        if self.snapshot.capacity == 0 {
            return invalid("snapshot.capacity must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.integrity.count_tolerance) {
            return invalid("integrity.count_tolerance must be within 0.0..=1.0");
        }
        if self.verification.interval_secs == Some(0) {
            return invalid("verification.interval_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert!(config.retry.allows(ErrorKind::Network));
        assert!(!config.retry.allows(ErrorKind::Validation));
    }

    #[test]
    fn test_partial_sections_override_only_named_keys() {
        let config = EngineConfig::from_toml_str(
            r#"
            [retry]
            max_retries = 5
            retryable_kinds = ["network"]

            [snapshot]
            capacity = 4

            [verification]
            interval_secs = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert!(!config.retry.allows(ErrorKind::Storage));
        assert_eq!(config.snapshot.capacity, 4);
        assert_eq!(config.verification.interval_secs, Some(30));
        assert_eq!(config.transaction.retention_secs, 300);
    }

    #[test]
    fn test_shrinking_multiplier_rejected() {
        let err = EngineConfig::from_toml_str("[retry]\nbackoff_multiplier = 0.5\n").unwrap_err();
        assert!(matches!(err, EditGuardError::Configuration { .. }));
    }

    #[test]
    fn test_malformed_toml_is_configuration_error() {
        let err = EngineConfig::from_toml_str("[retry\n").unwrap_err();
        assert!(matches!(err, EditGuardError::Configuration { .. }));
    }

    #[test]
    fn test_from_file_missing_is_io_error() {
        let err = EngineConfig::from_file(Path::new("/nonexistent/editguard.toml")).unwrap_err();
        assert!(matches!(err, EditGuardError::Io { .. }));
    }
}
