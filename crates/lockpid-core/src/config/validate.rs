//! Configuration validation

use super::types::Config;
use crate::{Error, Result};

impl Config {
    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any values are out of range or invalid
    pub fn validate(&self) -> Result<()> {
        if self.backoff_ms == 0 {
            return Err(Error::invalid_config("backoff_ms must be greater than 0"));
        }

        let name = self.lock_file_name.as_str();
        if name.trim().is_empty() {
            return Err(Error::invalid_config("lock_file_name cannot be empty"));
        }
        if name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(Error::invalid_config(format!(
                "lock_file_name must be a plain file name, got '{name}'"
            )));
        }

        Ok(())
    }
}
