//! Error handling for hippool
//!
//! Allocation failure is not an error: `alloc` returns `Ok(None)` once the
//! escalation ladder is exhausted, and callers branch on the absent value.
//! `PoolError` covers the remaining conditions: programmer errors (freeing an
//! unknown pointer), lifecycle misuse of the process-global pool, device
//! initialization failures, and poisoned locks.

use std::fmt;

/// Error type for pool operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Pointer passed to `free` is not present in the handle registry
    #[error("invalid free: pointer {0:#x} is not tracked by the pool")]
    InvalidFree(usize),

    /// The process-global pool has not been initialized
    #[error("pool not initialized: call hippool::init first")]
    Uninitialized,

    /// The process-global pool was initialized twice
    #[error("pool already initialized")]
    AlreadyInitialized,

    /// Rejected pool configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Device backend failure outside the allocation path
    #[error("device error: {0}")]
    Device(String),

    /// Internal lock poisoned by a panicking thread
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),
}

impl PoolError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            PoolError::InvalidFree(_)
            | PoolError::Uninitialized
            | PoolError::AlreadyInitialized
            | PoolError::InvalidConfiguration(_) => ErrorCategory::User,
            PoolError::Device(_) => ErrorCategory::Backend,
            PoolError::LockPoisoned(_) => ErrorCategory::Internal,
        }
    }

    /// Check if this is a user-facing error (actionable by the caller)
    pub fn is_user_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::User)
    }
}

/// Error category for handling decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller misuse: fix the calling code
    User,
    /// Device/driver failure
    Backend,
    /// Indicates a bug in the pool itself
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Backend => write!(f, "Backend"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for PoolError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PoolError::LockPoisoned(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type PoolResult<T> = std::result::Result<T, PoolError>;
