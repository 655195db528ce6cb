//! Configuration for the session repository.
//!
//! ```toml
//! [session]
//! max_inactive_interval_secs = 1800
//! max_sessions = 10000
//! enable_cleanup_task = true
//! cleanup_interval_secs = 60
//! ```

use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default inactivity window for newly created sessions (30 minutes).
pub const DEFAULT_MAX_INACTIVE_INTERVAL_SECS: i64 = 1800;

/// Default interval between background sweeps of expired sessions.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Configuration for the session repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Inactivity window applied to sessions created by the repository.
    /// A negative value means sessions never time out.
    pub max_inactive_interval_secs: i64,

    /// Maximum number of sessions held before the least recently used one
    /// is evicted. `None` leaves the store unbounded.
    pub max_sessions: Option<usize>,

    /// Whether to run periodic cleanup of expired sessions.
    /// If false, expired sessions are only reclaimed on access.
    pub enable_cleanup_task: bool,

    /// Interval in seconds for the cleanup task (if enabled).
    pub cleanup_interval_secs: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            max_inactive_interval_secs: DEFAULT_MAX_INACTIVE_INTERVAL_SECS,
            max_sessions: None,
            enable_cleanup_task: false,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    session: RepositoryConfig,
}

impl RepositoryConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `[session]` table of a TOML document.
    ///
    /// A document without that table yields the defaults.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(input)?;
        let config = file.session;
        config.validate()?;
        Ok(config)
    }

    /// Set the default inactivity window in seconds (negative = never expires).
    pub fn with_max_inactive_interval_secs(mut self, secs: i64) -> Self {
        self.max_inactive_interval_secs = secs;
        self
    }

    /// Bound the number of stored sessions.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    /// Remove the capacity bound.
    pub fn without_max_sessions(mut self) -> Self {
        self.max_sessions = None;
        self
    }

    /// Enable or disable the background cleanup task.
    pub fn with_cleanup_task(mut self, enabled: bool) -> Self {
        self.enable_cleanup_task = enabled;
        self
    }

    /// Set the cleanup interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_secs = interval.as_secs();
        self
    }

    /// The default inactivity window as a signed duration.
    pub fn max_inactive_interval(&self) -> TimeDelta {
        TimeDelta::seconds(self.max_inactive_interval_secs)
    }

    /// The cleanup interval as a duration.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Reject settings the repository cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == Some(0) {
            return Err(Error::InvalidConfig(
                "max_sessions must be greater than zero".to_string(),
            ));
        }
        if self.enable_cleanup_task && self.cleanup_interval_secs == 0 {
            return Err(Error::InvalidConfig(
                "cleanup_interval_secs must be greater than zero when the cleanup task is enabled"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
