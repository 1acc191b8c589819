//! Pool configuration and tunable constants
//!
//! All tunables are compile-time defaults. Exactly one environment flag is
//! recognized: `MANAGED_POOL` (default `true`); when disabled the binned pool
//! runs as a pure cache and only evicts under allocation pressure.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, PoolResult};

/// Largest request served from the size-class bins (128 MiB).
/// Larger requests bypass the pool entirely.
pub const MAX_POOL: usize = 1 << 27;

/// Number of historic usage samples retained per size class.
pub const USAGE_WINDOW: usize = 5;

/// Lower bound on the background reclaimer's adaptive sleep.
pub const MIN_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on the background reclaimer's adaptive sleep.
pub const MAX_DELAY: Duration = Duration::from_secs(5);

/// Number of size classes pre-created at init. `ensure_class` extends the
/// class table past this bound under the lock if a larger class is ever
/// needed; both paths share the same indexing.
pub const INITIAL_POOL_COUNT: usize = 30;

/// Environment flag controlling the background reclaimer
const MANAGED_POOL_ENV: &str = "MANAGED_POOL";

/// Which pool policy the process links
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolPolicy {
    /// One free list per power-of-two size class, background reclamation
    #[default]
    Binned,
    /// Single free set, bounded-oversize best-fit, no background task
    Simple,
}

/// Pool configuration. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool policy selected at process initialization
    pub policy: PoolPolicy,
    /// Spawn the background reclaimer (binned policy only)
    pub managed_pool: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            policy: PoolPolicy::Binned,
            managed_pool: true,
        }
    }
}

impl PoolConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool policy
    pub fn with_policy(mut self, policy: PoolPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Enable or disable the background reclaimer
    pub fn with_managed_pool(mut self, managed_pool: bool) -> Self {
        self.managed_pool = managed_pool;
        self
    }

    /// Build a configuration from the environment.
    ///
    /// Reads `MANAGED_POOL` as a boolean (`1`/`true`/`on`/`yes` or
    /// `0`/`false`/`off`/`no`, case-insensitive); unset means enabled. Any
    /// other value is rejected rather than silently defaulted, so a typo in
    /// a deployment cannot flip the reclaimer unnoticed.
    pub fn from_env() -> PoolResult<Self> {
        let managed_pool = match std::env::var(MANAGED_POOL_ENV) {
            Ok(value) => match value.to_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => true,
                "0" | "false" | "off" | "no" => false,
                _ => {
                    return Err(PoolError::InvalidConfiguration(format!(
                        "unrecognized {} value {:?}; expected a boolean",
                        MANAGED_POOL_ENV, value
                    )))
                }
            },
            Err(_) => true,
        };
        Ok(Self {
            managed_pool,
            ..Self::default()
        })
    }
}
