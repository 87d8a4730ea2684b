//! Scan configuration
//!
//! Every field has a default, so an empty TOML document is a valid config.
//!
//! ```toml
//! session_name = "catrole-session"
//! max_concurrency = 10
//! call_timeout_secs = 20
//!
//! [retry]
//! base_delay_ms = 200
//! max_delay_ms = 5000
//! max_attempts = 4
//! ```

use crate::core::credentials::RetryPolicy;
use crate::error::{CatroleError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// Tunables for a scan invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ScanConfig {
    /// Session name passed to AssumeRole
    #[validate(length(min = 2, max = 64))]
    pub session_name: String,

    /// Requested lifetime of assumed-role sessions
    #[validate(range(min = 900, max = 43200))]
    pub session_duration_secs: i32,

    /// Maximum in-flight account/principal tasks
    #[validate(range(min = 1, max = 256))]
    pub max_concurrency: usize,

    /// Deadline for each individual API call
    #[validate(range(min = 1, max = 300))]
    pub call_timeout_secs: u64,

    /// Cached credentials with less validity left than this are refreshed
    #[validate(range(max = 3600))]
    pub refresh_margin_secs: u64,

    /// Accounts whose credentials are kept
    #[validate(range(min = 1))]
    pub credential_cache_capacity: usize,

    /// Pages followed per listing before giving up with a warning
    #[validate(range(min = 1))]
    pub max_pages: usize,

    #[validate(nested)]
    pub retry: RetryPolicy,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            session_name: "catrole-session".to_string(),
            session_duration_secs: 3600,
            max_concurrency: 10,
            call_timeout_secs: 20,
            refresh_margin_secs: 60,
            credential_cache_capacity: 1024,
            max_pages: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

impl ScanConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: ScanConfig = toml::from_str(toml_str)?;
        config.check()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Validate field ranges and cross-field constraints
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(CatroleError::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.refresh_margin_secs >= self.session_duration_secs as u64 {
            return Err(CatroleError::Config(
                "refresh_margin_secs must be shorter than session_duration_secs".to_string(),
            ));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}
