//! SCM integration daemon.
//!
//! The daemon runs with the privileges needed to provision repositories
//! and access groups on the host. An application server talks to it over
//! a Unix socket; every request is authenticated with a transaction key
//! before any adapter code runs.

pub mod adapters;
pub mod analysis;
pub mod dispatch;
pub mod executor;
pub mod notify;
#[cfg(feature = "unix-sockets")]
pub mod server;

pub use adapters::{Adapter, AdapterContext, GroupSync, build_adapter};
pub use analysis::{AnalysisJobManager, AnalysisSettings};
pub use dispatch::SecuredDispatcher;
pub use notify::{NotificationSink, build_notifier};

#[cfg(test)]
#[ctor::ctor]
fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::new("scmd=debug,scm_common=debug"))
        .try_init();
}
