//! Startup validation of the daemon configuration.

use super::DaemonConfig;
use crate::types::AdapterKind;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// One finding from [`validate_config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub severity: Severity,
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.field, self.message)
    }
}

fn finding(severity: Severity, field: &'static str, message: impl Into<String>) -> ConfigWarning {
    ConfigWarning {
        severity,
        field,
        message: message.into(),
    }
}

/// Check `config` for values the daemon cannot run with (errors) and values
/// that are probably mistakes (warnings).
pub fn validate_config(config: &DaemonConfig) -> Vec<ConfigWarning> {
    let mut findings = Vec::new();

    if config.shared_secret().is_err() {
        findings.push(finding(
            Severity::Error,
            "daemon.shared_secret",
            "no signing secret configured; every request would be rejected",
        ));
    }

    if config.daemon.max_clock_skew_secs == 0 {
        findings.push(finding(
            Severity::Warning,
            "daemon.max_clock_skew_secs",
            "0 disables key expiry; transaction keys can be replayed indefinitely",
        ));
    }

    if !config.repository.root.is_absolute() {
        findings.push(finding(
            Severity::Error,
            "repository.root",
            format!(
                "must be an absolute path, got {}",
                config.repository.root.display()
            ),
        ));
    }

    if let Some(archive) = &config.repository.archive_root
        && archive.starts_with(&config.repository.root)
    {
        findings.push(finding(
            Severity::Warning,
            "repository.archive_root",
            "archive root lies inside the repository root",
        ));
    }

    if config.analysis.poll_interval_secs == 0 {
        findings.push(finding(
            Severity::Error,
            "analysis.poll_interval_secs",
            "must be at least 1 second",
        ));
    }

    if !matches!(config.logging.format.as_str(), "text" | "json") {
        findings.push(finding(
            Severity::Error,
            "logging.format",
            format!("expected 'text' or 'json', got '{}'", config.logging.format),
        ));
    }

    if matches!(
        config.daemon.adapter,
        AdapterKind::Subversion | AdapterKind::WandiscoSubversion
    ) && config.repository.svn_fs_type.trim().is_empty()
    {
        findings.push(finding(
            Severity::Error,
            "repository.svn_fs_type",
            "must not be empty",
        ));
    }

    if let Some(url) = &config.notify.webhook_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        findings.push(finding(
            Severity::Error,
            "notify.webhook_url",
            format!("expected an http(s) URL, got '{}'", url),
        ));
    }

    findings
}
