//! Shared types and utilities for the SCM integration daemon.
//!
//! This crate holds everything both the daemon and its clients need:
//! transaction-key authentication, the managed trigger block merge,
//! the privileged executor contract, configuration, logging and the
//! wire protocol.

pub mod auth;
pub mod config;
pub mod errors;
pub mod executor;
pub mod logging;
pub mod protocol;
pub mod trigger;
pub mod types;
pub mod util;

pub use auth::{AuthGuard, HmacKeyDerivation, KeyDerivation, TransactionKey};
pub use config::{ConfigError, DaemonConfig, validate_config};
pub use errors::{ErrorCode, ErrorKind, IntegrationError, Result};
pub use executor::{CommandResult, PrivilegedExecutor, ProcessHandle, ShellCommand, modes};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use protocol::{Envelope, Payload, Request, Response};
pub use trigger::{HookEvent, TriggerBlock};
pub use types::{
    ALL_USERS_GROUP, AccessLevel, AdapterKind, AnalysisOutcome, AnalysisState, GroupStatus,
    UNRESTRICTED_USERS_GROUP,
};

#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::new("scm_common=debug"))
        .try_init();
}
