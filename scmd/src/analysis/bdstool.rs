//! Invocations of the analysis client tool.

use crate::adapters::version::{ToolVersion, parse_library_version};
use scm_common::errors::{ErrorCode, IntegrationError, Result};
use scm_common::executor::{PrivilegedExecutor, ProcessHandle, ShellCommand};
use scm_common::protocol::AnalysisServer;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Project descriptor the tool leaves in an attached working directory.
pub const PROJECT_FILE: &str = "blackduck.xml";

/// Oldest client library the daemon drives.
pub const MIN_CLIENT_VERSION: [u32; 2] = [2, 2];

const CLIENT_LIBRARY: &str = "client.bdstool";

pub struct Bdstool {
    binary: String,
    executor: Arc<dyn PrivilegedExecutor>,
}

impl Bdstool {
    pub fn new(binary: impl Into<String>, executor: Arc<dyn PrivilegedExecutor>) -> Self {
        Self {
            binary: binary.into(),
            executor,
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn command(&self, workdir: &Path) -> ShellCommand {
        ShellCommand::new(self.binary.as_str()).current_dir(workdir)
    }

    /// Store credentials for `server` in `workdir`. The password only
    /// appears in the masked command line.
    pub fn login(&self, server: &AnalysisServer, workdir: &Path) -> Result<()> {
        let command = self
            .command(workdir)
            .arg("--server")
            .arg(format!("{}:{}", server.host, server.port))
            .arg("--user")
            .arg(server.user.as_str())
            .arg("--password")
            .arg(server.password.expose())
            .arg("login");
        let result = self.executor.run(&command)?;
        if !result.success() {
            debug!(command = %command, exit_code = result.exit_code, "Login rejected");
            return Err(IntegrationError::privileged(format!(
                "{} login: Login failed",
                self.binary
            ))
            .with_code(ErrorCode::AnalysisLoginFailed));
        }
        info!(host = %server.host, port = server.port, user = %server.user, "Logged in to analysis server");
        Ok(())
    }

    /// Attach `workdir` to the project named `key`, unless it already is.
    pub fn attach(&self, key: &str, workdir: &Path) -> Result<()> {
        if workdir.join(PROJECT_FILE).exists() {
            debug!(key, "Working directory already attached");
            return Ok(());
        }
        self.executor
            .run_checked(&self.command(workdir).args(["new-project", "--attach", key]))?;
        Ok(())
    }

    pub fn start_analysis(&self, workdir: &Path) -> Result<Box<dyn ProcessHandle>> {
        self.executor.spawn(
            &self
                .command(workdir)
                .args(["--expert-mode", "--rescan", "aggressive", "analyze"]),
        )
    }

    pub fn upload(&self, workdir: &Path) -> Result<()> {
        self.executor.run_checked(&self.command(workdir).arg("upload"))?;
        Ok(())
    }

    /// Client library version reported by `list-versions`.
    pub fn client_version(&self, workdir: &Path) -> Result<ToolVersion> {
        let output = self
            .executor
            .run_checked(&self.command(workdir).arg("list-versions"))?;
        parse_library_version(&output.stdout, CLIENT_LIBRARY)
            .and_then(|v| ToolVersion::parse_dotted(&v))
            .ok_or_else(|| {
                IntegrationError::unsupported(format!("No {} version found", CLIENT_LIBRARY))
                    .with_code(ErrorCode::AnalysisBackendTooOld)
            })
    }

    /// Whether the server accepts our credentials and speaks a client
    /// version we support.
    pub fn check_backend(&self, server: &AnalysisServer, workdir: &Path) -> Result<()> {
        self.login(server, workdir)?;
        let version = self.client_version(workdir)?;
        let minimum = ToolVersion::new(&MIN_CLIENT_VERSION);
        if !version.at_least(&minimum) {
            return Err(IntegrationError::unsupported(format!(
                "{} {} is older than {}",
                CLIENT_LIBRARY, version, minimum
            ))
            .with_code(ErrorCode::AnalysisBackendTooOld));
        }
        Ok(())
    }
}
