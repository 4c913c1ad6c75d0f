//! Settings for the transaction engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When the Failed record for an attempt that could not be applied is written.
///
/// The same policy applies to every transaction kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditPolicy {
    /// Write the Failed record before the engine returns the error.
    #[default]
    Synchronous,
    /// Write the Failed record on a background thread with its own
    /// connection. The caller does not wait for it and a failed write is only
    /// logged.
    Detached,
}

/// The settings used by [crate::Engine].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a transaction waits for an account lock before giving up.
    pub lock_timeout: Duration,
    /// How Failed records are written.
    pub audit_policy: AuditPolicy,
}

impl EngineConfig {
    /// The default lock timeout.
    pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Self::DEFAULT_LOCK_TIMEOUT,
            audit_policy: AuditPolicy::default(),
        }
    }
}
