//! Configuration loading and management
//!
//! # Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Global config: `<config dir>/lockpid/config.toml`
//! 3. Project config: `.lockpid/config.toml`
//! 4. Environment variables: `LOCKPID_*`
//! 5. CLI flags (command-specific)
//!
//! # Example Config
//!
//! ```toml
//! backoff_ms = 1000
//! lock_file_name = "lock"
//! liveness_failure = "assume-alive"
//! wait_ms = 4000
//! stale_ms = 1000000
//! ```

mod load;
mod merge;
mod types;
mod validate;

#[cfg(test)]
mod tests_loading;
#[cfg(test)]
mod tests_validation;

pub use load::{global_config_path, load_config, load_config_from, load_toml_file, project_config_path};
pub use types::{Config, ConfigLayer};
