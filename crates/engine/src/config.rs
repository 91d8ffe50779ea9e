//! Engine configuration
//!
//! Configuration is plain data: it can be built in code through
//! [`EngineBuilder`](crate::EngineBuilder) or loaded from TOML.
//!
//! ```toml
//! reaction_loop_limit = 10
//! gc_summary_interval_ms = 60000
//! default_reentrance = "PreventWithError"
//!
//! [trace]
//! transactions = true
//! ```

use revo_core::{Error, Reentrance, Result, TraceOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default number of times one reaction may re-run within a single drain
pub const DEFAULT_REACTION_LOOP_LIMIT: usize = 10;

/// Default interval between periodic history summaries
pub const DEFAULT_GC_SUMMARY_INTERVAL_MS: u64 = 60_000;

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum re-runs of one reaction during a single drain of the queue
    pub reaction_loop_limit: usize,
    /// Interval between periodic history summaries in the log (0 disables)
    pub gc_summary_interval_ms: u64,
    /// Reentrance policy of operations that don't set one
    pub default_reentrance: Reentrance,
    /// Trace switches of snapshots that don't set their own
    pub trace: TraceOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reaction_loop_limit: DEFAULT_REACTION_LOOP_LIMIT,
            gc_summary_interval_ms: DEFAULT_GC_SUMMARY_INTERVAL_MS,
            default_reentrance: Reentrance::PreventWithError,
            trace: TraceOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(text).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.reaction_loop_limit == 0 {
            return Err(Error::InvalidConfig(
                "reaction_loop_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Summary interval, or None when disabled
    pub fn gc_summary_interval(&self) -> Option<Duration> {
        match self.gc_summary_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}
