//! Environment variable parsing with type safety.
//!
//! Provides a type-safe parser for `SCMD_` environment variables with
//! validation, error collection, and source tracking.

use super::source::{ConfigSource, Sourced};
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Create a new parser with the SCMD_ prefix.
    pub fn new() -> Self {
        Self {
            prefix: "SCMD_",
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Take ownership of errors.
    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    /// Record an error found by the caller while interpreting a value.
    pub fn push_error(&mut self, error: EnvError) {
        self.errors.push(error);
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get a string value with default.
    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => Sourced::from_env(value, var_name),
            Err(_) => Sourced::default_value(default.to_string()),
        }
    }

    /// Get an optional string (None if not set or empty).
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.is_empty() => Sourced::from_env(None, var_name),
            Ok(value) => Sourced::from_env(Some(value), var_name),
            Err(_) => Sourced::default_value(None),
        }
    }

    /// Get a u64 value with default and range validation.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.parse::<u64>() {
                Ok(n) if n >= min && n <= max => Sourced::from_env(n, var_name),
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name.clone(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::default_value(default)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "unsigned 64-bit integer".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get a path value with ~ expansion.
    pub fn get_path(&mut self, name: &str, default: &str) -> Sourced<PathBuf> {
        let var_name = self.var_name(name);
        let (value, source) = match env::var(&var_name) {
            Ok(v) => (v, ConfigSource::Environment),
            Err(_) => (default.to_string(), ConfigSource::Default),
        };

        let expanded = match value.strip_prefix("~/") {
            Some(stripped) => dirs::home_dir()
                .map(|home| home.join(stripped))
                .unwrap_or_else(|| PathBuf::from(&value)),
            None => PathBuf::from(&value),
        };

        if source == ConfigSource::Environment {
            Sourced::from_env(expanded, var_name)
        } else {
            Sourced::default_value(expanded)
        }
    }

    /// Get a log level value with validation.
    pub fn get_log_level(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => {
                let lower = value.to_lowercase();
                match lower.as_str() {
                    "trace" | "debug" | "info" | "warn" | "error" | "off" => {
                        Sourced::from_env(lower, var_name)
                    }
                    _ => {
                        self.errors.push(EnvError::InvalidLogLevel {
                            var: var_name.clone(),
                            value: value.clone(),
                        });
                        Sourced::default_value(default.to_string())
                    }
                }
            }
            Err(_) => Sourced::default_value(default.to_string()),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::env_test_lock;

    fn cleanup_env(vars: &[&str]) {
        for var in vars {
            // SAFETY: env access is serialized by env_test_lock
            unsafe { env::remove_var(var) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: env access is serialized by env_test_lock
        unsafe { env::set_var(key, value) };
    }

    #[test]
    fn test_get_u64_range() {
        let _guard = env_test_lock();
        let vars = ["SCMD_TEST_U64"];
        cleanup_env(&vars);

        set_env("SCMD_TEST_U64", "50");
        let mut parser = EnvParser::new();
        let result = parser.get_u64_range("TEST_U64", 10, 0, 100);
        assert_eq!(result.value, 50);
        assert_eq!(result.source, ConfigSource::Environment);

        set_env("SCMD_TEST_U64", "500");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_u64_range("TEST_U64", 10, 0, 100).value, 10);
        assert!(matches!(parser.errors()[0], EnvError::OutOfRange { .. }));

        set_env("SCMD_TEST_U64", "abc");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_u64_range("TEST_U64", 10, 0, 100).value, 10);
        assert!(matches!(parser.errors()[0], EnvError::InvalidValue { .. }));

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_path_unset_uses_default() {
        let _guard = env_test_lock();
        cleanup_env(&["SCMD_TEST_PATH"]);

        let mut parser = EnvParser::new();
        let result = parser.get_path("TEST_PATH", "/var/scm");
        assert_eq!(result.value, PathBuf::from("/var/scm"));
        assert_eq!(result.source, ConfigSource::Default);
    }

    #[test]
    fn test_get_log_level_invalid() {
        let _guard = env_test_lock();
        let vars = ["SCMD_TEST_LEVEL"];
        set_env("SCMD_TEST_LEVEL", "LOUD");

        let mut parser = EnvParser::new();
        let level = parser.get_log_level("TEST_LEVEL", "info");
        assert_eq!(level.value, "info");
        assert!(matches!(
            parser.take_errors().as_slice(),
            [EnvError::InvalidLogLevel { .. }]
        ));

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_optional_string_empty_is_none() {
        let _guard = env_test_lock();
        let vars = ["SCMD_TEST_OPT"];
        set_env("SCMD_TEST_OPT", "");

        let mut parser = EnvParser::new();
        let value = parser.get_optional_string("TEST_OPT");
        assert_eq!(value.value, None);
        assert_eq!(value.source, ConfigSource::Environment);

        cleanup_env(&vars);
    }
}
