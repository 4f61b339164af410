//! Error types for the SCM integration daemon.
//!
//! Every failure crossing the request boundary is an [`IntegrationError`]:
//! a tagged [`ErrorKind`], a human-readable message and an optional wrapped
//! cause. Each kind maps to a stable catalog code (see [`catalog`]).
//!
//! # Error Code Ranges
//!
//! | Range      | Category    | Description                          |
//! |------------|-------------|--------------------------------------|
//! | E001-E099  | Auth        | Transaction key validation           |
//! | E100-E199  | Repository  | Repository lifecycle and adapters    |
//! | E200-E299  | Executor    | Privileged command execution         |
//! | E300-E399  | Analysis    | Background analysis jobs             |
//! | E400-E499  | Config      | Configuration and setup errors       |
//! | E500-E599  | Internal    | Internal/unexpected errors           |

pub mod catalog;

pub use catalog::{ErrorCategory, ErrorCode, ErrorEntry};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure taxonomy surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad signature or expired transaction key.
    AuthenticationFailure,
    /// Target repository path already exists.
    ObjectAlreadyExists,
    /// Wrong adapter type, tool too old, operation or platform unsupported.
    AdapterUnsupported,
    /// A privileged command or filesystem operation failed.
    PrivilegedOperationFailure,
    /// A repository-relative path is invalid.
    InvalidPath,
    /// Daemon configuration is missing or invalid.
    Configuration,
    /// Unexpected internal failure.
    Internal,
}

impl ErrorKind {
    /// Catalog code for this kind.
    pub fn code(&self) -> ErrorCode {
        match self {
            ErrorKind::AuthenticationFailure => ErrorCode::AuthSignatureMismatch,
            ErrorKind::ObjectAlreadyExists => ErrorCode::RepoAlreadyExists,
            ErrorKind::AdapterUnsupported => ErrorCode::RepoAdapterUnsupported,
            ErrorKind::PrivilegedOperationFailure => ErrorCode::ExecCommandFailed,
            ErrorKind::InvalidPath => ErrorCode::RepoInvalidPath,
            ErrorKind::Configuration => ErrorCode::ConfigValidationError,
            ErrorKind::Internal => ErrorCode::InternalStateError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::AuthenticationFailure => "authentication failure",
            ErrorKind::ObjectAlreadyExists => "object already exists",
            ErrorKind::AdapterUnsupported => "adapter unsupported",
            ErrorKind::PrivilegedOperationFailure => "privileged operation failure",
            ErrorKind::InvalidPath => "invalid path",
            ErrorKind::Configuration => "configuration error",
            ErrorKind::Internal => "internal error",
        };
        write!(f, "{}", name)
    }
}

/// Error returned by every secured operation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct IntegrationError {
    kind: ErrorKind,
    message: String,
    code: Option<ErrorCode>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

pub type Result<T, E = IntegrationError> = std::result::Result<T, E>;

impl IntegrationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            source: None,
        }
    }

    /// Override the catalog code derived from the kind.
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the underlying cause.
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationFailure, message)
    }

    pub fn already_exists(path: impl fmt::Display) -> Self {
        Self::new(ErrorKind::ObjectAlreadyExists, path.to_string())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AdapterUnsupported, message)
    }

    pub fn privileged(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PrivilegedOperationFailure, message)
    }

    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidPath, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Wrap an I/O failure on `path` as a privileged operation failure.
    pub fn io(action: &str, path: &std::path::Path, err: std::io::Error) -> Self {
        Self::privileged(format!("{} {}: {}", action, path.display(), err)).with_source(err)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> ErrorCode {
        self.code.unwrap_or_else(|| self.kind.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display_is_message() {
        let err = IntegrationError::already_exists("/scm/p1");
        assert_eq!(err.to_string(), "/scm/p1");
        assert_eq!(err.kind(), ErrorKind::ObjectAlreadyExists);
    }

    #[test]
    fn test_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = IntegrationError::io("create", std::path::Path::new("/x"), io);
        assert_eq!(err.kind(), ErrorKind::PrivilegedOperationFailure);
        assert!(err.source().is_some());
        assert!(err.message().contains("/x"));
    }

    #[test]
    fn test_every_kind_has_catalog_code() {
        let kinds = [
            ErrorKind::AuthenticationFailure,
            ErrorKind::ObjectAlreadyExists,
            ErrorKind::AdapterUnsupported,
            ErrorKind::PrivilegedOperationFailure,
            ErrorKind::InvalidPath,
            ErrorKind::Configuration,
            ErrorKind::Internal,
        ];
        for kind in kinds {
            assert!(kind.code().code_string().starts_with("SCM-E"));
        }
    }
}
