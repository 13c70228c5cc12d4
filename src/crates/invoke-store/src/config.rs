//! Store configuration
//!
//! The store has one knob: whether the process-wide singleton slot is used.
//! It is read from the environment once, when the singleton is resolved.
//!
//! # Example
//!
//! ```rust
//! use invoke_store::config::{FromEnv, StoreConfig};
//!
//! // Load from environment
//! let config = StoreConfig::from_env();
//!
//! // Or build explicitly
//! let isolated = StoreConfig::default().with_no_global(true);
//! assert!(isolated.no_global);
//! ```

/// Environment variable that disables global publication
pub const NO_GLOBAL_ENV: &str = "AWS_LAMBDA_NODEJS_NO_GLOBAL_AWSLAMBDA";

/// Parse an opt-out flag.
///
/// Only the exact strings `"1"` and `"true"` enable the flag. Anything else,
/// including `"TRUE"` or `"yes"`, leaves it disabled.
pub fn parse_flag(value: &str) -> bool {
    matches!(value, "1" | "true")
}

/// Get an environment variable as a string, if set and valid unicode.
fn get_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get a strict boolean flag from the environment.
fn get_env_flag(key: &str) -> bool {
    get_env(key).as_deref().map(parse_flag).unwrap_or(false)
}

/// Trait for configuration that can be loaded from the process environment.
pub trait FromEnv: Sized {
    /// Load configuration from the process environment.
    fn from_env() -> Self;
}

/// Configuration for singleton resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Skip reading from and publishing to the process-wide slot
    pub no_global: bool,
}

impl StoreConfig {
    /// Set the opt-out flag
    pub fn with_no_global(mut self, no_global: bool) -> Self {
        self.no_global = no_global;
        self
    }

    /// Load from a specific environment variable instead of [`NO_GLOBAL_ENV`]
    pub fn from_env_var(key: &str) -> Self {
        Self {
            no_global: get_env_flag(key),
        }
    }

    /// Load through a lookup function, for hosts that keep their own
    /// environment map
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            no_global: lookup(NO_GLOBAL_ENV)
                .as_deref()
                .map(parse_flag)
                .unwrap_or(false),
        }
    }
}

impl FromEnv for StoreConfig {
    fn from_env() -> Self {
        Self::from_env_var(NO_GLOBAL_ENV)
    }
}
