//! Error catalog for the SCM integration daemon.
//!
//! Each error code carries a unique identifier (SCM-E001 through SCM-E599),
//! a message template and remediation steps. Codes are stable: the
//! application server matches on them when deciding whether to retry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code enumeration covering all daemon error scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // =========================================================================
    // Auth Errors (E001-E099)
    // =========================================================================
    /// Transaction key could not be decoded
    AuthMalformedKey,
    /// Transaction key signature does not match
    AuthSignatureMismatch,
    /// Transaction key timestamp is outside the replay window
    AuthKeyExpired,

    // =========================================================================
    // Repository Errors (E100-E199)
    // =========================================================================
    /// Repository path already exists
    RepoAlreadyExists,
    /// Adapter type, tool version or platform not supported
    RepoAdapterUnsupported,
    /// Repository root is bound to another external system
    RepoSystemConflict,
    /// Relative path does not exist in the repository
    RepoInvalidPath,
    /// Repository could not be archived
    RepoArchiveFailed,

    // =========================================================================
    // Executor Errors (E200-E299)
    // =========================================================================
    /// Privileged command exited non-zero
    ExecCommandFailed,
    /// Privileged command could not be spawned
    ExecSpawnFailed,
    /// Filesystem operation failed
    ExecFilesystemError,
    /// Trigger merge failed
    ExecTriggerMergeFailed,

    // =========================================================================
    // Analysis Errors (E300-E399)
    // =========================================================================
    /// Analysis backend login failed
    AnalysisLoginFailed,
    /// Analysis process exited non-zero
    AnalysisProcessFailed,
    /// Analysis backend version is too old
    AnalysisBackendTooOld,

    // =========================================================================
    // Config Errors (E400-E499)
    // =========================================================================
    /// Configuration file could not be read
    ConfigReadError,
    /// Configuration file contains invalid TOML syntax
    ConfigParseError,
    /// Configuration contains invalid values
    ConfigValidationError,
    /// Environment variable has invalid value
    ConfigEnvError,

    // =========================================================================
    // Internal Errors (E500-E599)
    // =========================================================================
    /// Daemon socket error
    InternalDaemonSocket,
    /// Malformed request on the daemon socket
    InternalDaemonProtocol,
    /// Unexpected internal state
    InternalStateError,
}

impl ErrorCode {
    /// All error codes, in catalog order.
    pub fn all() -> &'static [ErrorCode] {
        &[
            Self::AuthMalformedKey,
            Self::AuthSignatureMismatch,
            Self::AuthKeyExpired,
            Self::RepoAlreadyExists,
            Self::RepoAdapterUnsupported,
            Self::RepoSystemConflict,
            Self::RepoInvalidPath,
            Self::RepoArchiveFailed,
            Self::ExecCommandFailed,
            Self::ExecSpawnFailed,
            Self::ExecFilesystemError,
            Self::ExecTriggerMergeFailed,
            Self::AnalysisLoginFailed,
            Self::AnalysisProcessFailed,
            Self::AnalysisBackendTooOld,
            Self::ConfigReadError,
            Self::ConfigParseError,
            Self::ConfigValidationError,
            Self::ConfigEnvError,
            Self::InternalDaemonSocket,
            Self::InternalDaemonProtocol,
            Self::InternalStateError,
        ]
    }

    /// Returns the numeric part of the code.
    #[must_use]
    pub const fn code_number(&self) -> u16 {
        match self {
            Self::AuthMalformedKey => 1,
            Self::AuthSignatureMismatch => 2,
            Self::AuthKeyExpired => 3,

            Self::RepoAlreadyExists => 100,
            Self::RepoAdapterUnsupported => 101,
            Self::RepoSystemConflict => 102,
            Self::RepoInvalidPath => 103,
            Self::RepoArchiveFailed => 104,

            Self::ExecCommandFailed => 200,
            Self::ExecSpawnFailed => 201,
            Self::ExecFilesystemError => 202,
            Self::ExecTriggerMergeFailed => 203,

            Self::AnalysisLoginFailed => 300,
            Self::AnalysisProcessFailed => 301,
            Self::AnalysisBackendTooOld => 302,

            Self::ConfigReadError => 400,
            Self::ConfigParseError => 401,
            Self::ConfigValidationError => 402,
            Self::ConfigEnvError => 403,

            Self::InternalDaemonSocket => 500,
            Self::InternalDaemonProtocol => 501,
            Self::InternalStateError => 502,
        }
    }

    /// Returns the formatted error code string (e.g., "SCM-E001").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("SCM-E{:03}", self.code_number())
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self.code_number() {
            1..=99 => ErrorCategory::Auth,
            100..=199 => ErrorCategory::Repository,
            200..=299 => ErrorCategory::Executor,
            300..=399 => ErrorCategory::Analysis,
            400..=499 => ErrorCategory::Config,
            _ => ErrorCategory::Internal,
        }
    }

    /// Returns the full error entry with all metadata.
    #[must_use]
    pub fn entry(&self) -> ErrorEntry {
        ErrorEntry {
            code: self.code_string(),
            category: self.category(),
            message: self.message().to_string(),
            remediation: self
                .remediation()
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }

    /// Returns the error message template.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::AuthMalformedKey => "Transaction key could not be decoded",
            Self::AuthSignatureMismatch => "Transaction key signature does not match",
            Self::AuthKeyExpired => "Transaction key is outside the permitted clock skew",

            Self::RepoAlreadyExists => "Repository path already exists",
            Self::RepoAdapterUnsupported => "Adapter type, tool version or platform is not supported",
            Self::RepoSystemConflict => "Repository root is bound to another external system",
            Self::RepoInvalidPath => "Path does not exist in the repository",
            Self::RepoArchiveFailed => "Repository could not be archived",

            Self::ExecCommandFailed => "Privileged command failed",
            Self::ExecSpawnFailed => "Privileged command could not be started",
            Self::ExecFilesystemError => "Filesystem operation failed",
            Self::ExecTriggerMergeFailed => "Trigger script could not be updated",

            Self::AnalysisLoginFailed => "Login to the analysis server failed",
            Self::AnalysisProcessFailed => "Analysis process exited with an error",
            Self::AnalysisBackendTooOld => "Analysis client is older than the supported version",

            Self::ConfigReadError => "Failed to read configuration file",
            Self::ConfigParseError => "Configuration file contains invalid TOML syntax",
            Self::ConfigValidationError => "Configuration contains invalid values",
            Self::ConfigEnvError => "Environment variable has invalid value",

            Self::InternalDaemonSocket => "Daemon socket error",
            Self::InternalDaemonProtocol => "Malformed request on the daemon socket",
            Self::InternalStateError => "Unexpected internal state",
        }
    }

    /// Returns remediation steps for the error.
    #[must_use]
    pub const fn remediation(&self) -> &'static [&'static str] {
        match self {
            Self::AuthMalformedKey | Self::AuthSignatureMismatch => &[
                "Check that the application server and daemon share the same secret",
                "Regenerate the transaction key for this request",
            ],
            Self::AuthKeyExpired => &[
                "Synchronize clocks between the application server and this host",
                "Increase daemon.max_clock_skew_secs if the skew is expected",
            ],
            Self::RepoAlreadyExists => &["Choose a different repository directory"],
            Self::RepoAdapterUnsupported => &[
                "Verify the adapter kind configured for this daemon",
                "Upgrade the SCM tools to a supported version",
            ],
            Self::RepoSystemConflict => &[
                "Delete the existing integration before binding a new one",
                "Use a different repository root for this integration",
            ],
            Self::RepoInvalidPath => &["Specify a module or path that exists in the repository"],
            Self::RepoArchiveFailed => &[
                "Check that the archive root is writable",
                "Retry the archive; the repository was left in place",
            ],
            Self::ExecCommandFailed | Self::ExecSpawnFailed => &[
                "Check that the daemon runs with sufficient privileges",
                "Verify executable paths in the [executables] config section",
            ],
            Self::ExecFilesystemError | Self::ExecTriggerMergeFailed => &[
                "Check permissions on the repository root",
            ],
            Self::AnalysisLoginFailed => &["Verify analysis server host, port and credentials"],
            Self::AnalysisProcessFailed => &["Inspect the analysis workspace for tool output"],
            Self::AnalysisBackendTooOld => &["Install bdstool 2.2 or newer"],
            Self::ConfigReadError | Self::ConfigParseError => &[
                "Check the configuration file path and syntax",
                "Run `scmd check-config` to validate",
            ],
            Self::ConfigValidationError | Self::ConfigEnvError => &[
                "Run `scmd check-config` to list invalid values",
            ],
            Self::InternalDaemonSocket
            | Self::InternalDaemonProtocol
            | Self::InternalStateError => &["Check the daemon log for details"],
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code_string())
    }
}

/// Error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Auth,
    Repository,
    Executor,
    Analysis,
    Config,
    Internal,
}

impl ErrorCategory {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Auth => "Auth",
            Self::Repository => "Repository",
            Self::Executor => "Executor",
            Self::Analysis => "Analysis",
            Self::Config => "Config",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Complete error entry with all metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Error code string (e.g., "SCM-E001")
    pub code: String,
    pub category: ErrorCategory,
    pub message: String,
    /// Steps to remediate the error
    pub remediation: Vec<String>,
}

impl ErrorEntry {
    /// Formats the error for display with full remediation steps.
    #[must_use]
    pub fn format_full(&self) -> String {
        let mut output = format!("[{}] {}\n\n", self.code, self.message);

        if !self.remediation.is_empty() {
            output.push_str("Remediation steps:\n");
            for (i, step) in self.remediation.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }

        output
    }

    /// Formats the error as a single line.
    #[must_use]
    pub fn format_brief(&self) -> String {
        format!("[{}] {}", self.code, self.message)
    }
}

impl fmt::Display for ErrorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_brief())
    }
}
