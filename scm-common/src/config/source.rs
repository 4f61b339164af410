//! Source tracking for configuration values.

use std::fmt;

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Default,
    File,
    Environment,
    CommandLine,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigSource::Default => "default",
            ConfigSource::File => "config file",
            ConfigSource::Environment => "environment",
            ConfigSource::CommandLine => "command line",
        };
        write!(f, "{}", name)
    }
}

/// A value paired with its source (and the variable name, for env values).
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    pub var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            var: None,
        }
    }

    pub fn from_env(value: T, var: impl Into<String>) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            var: Some(var.into()),
        }
    }

    /// The value if it was set explicitly in the environment.
    pub fn from_environment(self) -> Option<T> {
        match self.source {
            ConfigSource::Environment => Some(self.value),
            _ => None,
        }
    }
}
