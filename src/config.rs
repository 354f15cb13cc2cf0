//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config. The CLI
//! loads an optional file and lets flags override individual fields.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::validators::RotationPolicy;
use crate::error::{Result, SimError};

pub const DEFAULT_VALIDATORS: usize = 5;
pub const DEFAULT_MAX_ROTATIONS: u32 = 3;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;
pub const DEFAULT_CHAIN_ID: u64 = 61999;
pub const DEFAULT_LIVE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_POST_DRAIN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub validators: usize,
    pub max_rotations: u32,
    pub max_call_depth: usize,
    pub chain_id: u64,
    /// Warn about mocks that were registered but never matched.
    pub strict_mocks: bool,
    /// Probe captured nondet operations for serializability.
    pub check_pickling: bool,
    /// Call live handlers when no mock matches.
    pub live_fallback: bool,
    pub live_timeout_ms: u64,
    pub rotation_policy: RotationPolicy,
    /// Upper bound on posts delivered after one top-level call.
    pub max_post_drain: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            validators: DEFAULT_VALIDATORS,
            max_rotations: DEFAULT_MAX_ROTATIONS,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            chain_id: DEFAULT_CHAIN_ID,
            strict_mocks: false,
            check_pickling: false,
            live_fallback: false,
            live_timeout_ms: DEFAULT_LIVE_TIMEOUT_MS,
            rotation_policy: RotationPolicy::default(),
            max_post_drain: DEFAULT_MAX_POST_DRAIN,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<()> {
        if self.validators == 0 {
            return Err(SimError::Config("validators must be at least 1".to_string()));
        }
        if self.max_call_depth == 0 {
            return Err(SimError::Config("max_call_depth must be at least 1".to_string()));
        }
        if self.live_timeout_ms == 0 {
            return Err(SimError::Config("live_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: SimConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| SimError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn live_timeout(&self) -> Duration {
        Duration::from_millis(self.live_timeout_ms)
    }
}
