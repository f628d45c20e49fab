//! Environment variable names read by [`setup_from_env`](crate::config::setup_from_env).
//!
//! These are purely helpers; the pipeline itself never reads the
//! environment.

/// Minimum level, e.g. `DEBUG` or `warning` (default `INFO`).
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// `0` selects console output; anything else selects JSON (default `1`).
pub const JSON_LOGS_ENV: &str = "JSON_LOGS";

/// Optional path of an additional rotating JSON log file.
pub const LOG_PATH_ENV: &str = "LOG_PATH";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
