//! Configuration merging logic (Immutable functional pattern)
//!
//! Later layers override earlier ones (defaults → global → project → env → CLI).
//! Only the keys a layer actually sets override `self`.

use super::types::{Config, ConfigLayer};

impl Config {
    /// Apply a file layer on top of this config - immutable pattern
    pub fn merge(self, layer: ConfigLayer) -> Self {
        Self {
            backoff_ms: layer.backoff_ms.unwrap_or(self.backoff_ms),
            lock_file_name: layer.lock_file_name.unwrap_or(self.lock_file_name),
            liveness_failure: layer.liveness_failure.unwrap_or(self.liveness_failure),
            wait_ms: layer.wait_ms.or(self.wait_ms),
            stale_ms: layer.stale_ms.or(self.stale_ms),
        }
    }
}
