//! Logging setup shared by the daemon binary and tests.
//!
//! Logs go to stderr (text or JSON) and optionally to a daily-rolling file
//! through a non-blocking writer. The returned [`LoggingGuards`] must be held
//! for the lifetime of the process so buffered file output is flushed.

use crate::config::LoggingSection;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    pub stderr: bool,
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl LogConfig {
    /// Start from `SCMD_LOG_LEVEL` / `SCMD_LOG_FORMAT`, falling back to
    /// `default_level` and text output.
    pub fn from_env(default_level: &str) -> Self {
        let level = std::env::var("SCMD_LOG_LEVEL").unwrap_or_else(|_| default_level.to_string());
        let format = match std::env::var("SCMD_LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };
        Self {
            level,
            format,
            stderr: false,
            directory: None,
            file_prefix: "scmd.log".to_string(),
        }
    }

    pub fn from_section(section: &LoggingSection) -> Self {
        let format = if section.format == "json" {
            LogFormat::Json
        } else {
            LogFormat::Text
        };
        Self {
            level: section.level.clone(),
            format,
            stderr: true,
            directory: section.directory.clone(),
            file_prefix: "scmd.log".to_string(),
        }
    }

    pub fn with_stderr(mut self) -> Self {
        self.stderr = true;
        self
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }

    pub fn with_directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

/// Keeps non-blocking writers alive.
#[must_use = "dropping the guards stops file logging"]
pub struct LoggingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let mut guards = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.stderr {
        let layer = match config.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed(),
            LogFormat::Text => fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed(),
        };
        layers.push(layer);
    }

    if let Some(dir) = &config.directory {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {:?}", dir))?;
        let appender = tracing_appender::rolling::daily(dir, &config.file_prefix);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(config.filter())
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LoggingGuards { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = LogConfig::from_env("warn")
            .with_stderr()
            .with_level("debug")
            .with_directory("/tmp/scmd-logs");
        assert!(config.stderr);
        assert_eq!(config.level, "debug");
        assert_eq!(config.directory, Some(PathBuf::from("/tmp/scmd-logs")));
    }

    #[test]
    fn test_from_section() {
        let section = LoggingSection {
            level: "trace".to_string(),
            format: "json".to_string(),
            directory: None,
        };
        let config = LogConfig::from_section(&section);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.level, "trace");
        assert!(config.stderr);
    }
}
