//! Background source-code analysis jobs.
//!
//! Each job checks the repository out into `<analysis_root>/<key>`, logs in
//! to the analysis server, attaches the working directory to a project,
//! runs the analyzer and uploads the result. Jobs run on their own thread
//! and are tracked in a registry keyed by the caller's job key:
//!
//! ```text
//! started -> checkout -> login -> attach -> analyze -> upload -> completed
//!                                                   \-> exception | cancelled
//! ```
//!
//! Cancellation is cooperative: the flag is checked between phases and on
//! every analyzer poll, and a running analyzer is killed. The job thread
//! removes its own registry entry once it has reported the outcome, so a
//! finished job reads as `not_running`.

pub mod bdstool;

pub use bdstool::Bdstool;

use crate::adapters::Adapter;
use crate::notify::NotificationSink;
use scm_common::config::DaemonConfig;
use scm_common::errors::{ErrorCode, IntegrationError, Result};
use scm_common::executor::{PrivilegedExecutor, modes};
use scm_common::protocol::AnalysisServer;
use scm_common::types::{AnalysisOutcome, AnalysisState};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Where and how analysis jobs run.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub root: PathBuf,
    pub poll_interval: Duration,
    /// Owner of the analysis root and working directories.
    pub owner: String,
    pub bdstool: String,
}

impl AnalysisSettings {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            root: config.analysis_root(),
            poll_interval: Duration::from_secs(config.analysis.poll_interval_secs),
            owner: config.identity.analysis_user.clone(),
            bdstool: config.executables.bdstool.clone(),
        }
    }
}

/// What a caller needs to start a job.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub key: String,
    pub repository_path: String,
    pub relative_path: String,
    pub server: AnalysisServer,
}

struct AnalysisJob {
    key: String,
    state: Mutex<AnalysisState>,
    cancel_requested: AtomicBool,
}

impl AnalysisJob {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            state: Mutex::new(AnalysisState::Started),
            cancel_requested: AtomicBool::new(false),
        }
    }

    fn state(&self) -> AnalysisState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: AnalysisState) {
        debug!(key = %self.key, %state, "Analysis phase");
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    fn cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

/// How a job run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobEnd {
    Completed,
    Cancelled,
}

struct ManagerInner {
    jobs: Mutex<HashMap<String, Arc<AnalysisJob>>>,
    adapter: Arc<dyn Adapter>,
    executor: Arc<dyn PrivilegedExecutor>,
    bdstool: Bdstool,
    notifier: Arc<dyn NotificationSink>,
    settings: AnalysisSettings,
}

/// Registry and runner for analysis jobs.
#[derive(Clone)]
pub struct AnalysisJobManager {
    inner: Arc<ManagerInner>,
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.contains('/') || key.contains('\\') || key.contains("..") {
        return Err(IntegrationError::invalid_path(format!(
            "Invalid analysis key '{}'",
            key
        )));
    }
    Ok(())
}

impl AnalysisJobManager {
    pub fn new(
        adapter: Arc<dyn Adapter>,
        executor: Arc<dyn PrivilegedExecutor>,
        notifier: Arc<dyn NotificationSink>,
        settings: AnalysisSettings,
    ) -> Self {
        info!(
            root = %settings.root.display(),
            poll = %humantime::format_duration(settings.poll_interval),
            "Analysis job manager ready"
        );
        let bdstool = Bdstool::new(settings.bdstool.clone(), executor.clone());
        Self {
            inner: Arc::new(ManagerInner {
                jobs: Mutex::new(HashMap::new()),
                adapter,
                executor,
                bdstool,
                notifier,
                settings,
            }),
        }
    }

    /// Start a job unless one is already registered under the same key.
    pub fn begin(&self, request: AnalysisRequest) -> Result<()> {
        validate_key(&request.key)?;
        let job = {
            let mut jobs = self.inner.jobs();
            if let Some(existing) = jobs.get(&request.key) {
                info!(key = %request.key, state = %existing.state(), "Analysis already running");
                return Ok(());
            }
            let job = Arc::new(AnalysisJob::new(&request.key));
            jobs.insert(request.key.clone(), job.clone());
            job
        };

        let inner = self.inner.clone();
        let key = request.key.clone();
        let spawned = thread::Builder::new()
            .name(format!("analysis-{}", key))
            .spawn(move || inner.run(job, request));
        if let Err(e) = spawned {
            self.inner.jobs().remove(&key);
            return Err(IntegrationError::internal(format!(
                "Failed to start analysis thread for {}: {}",
                key, e
            ))
            .with_source(e));
        }
        info!(key = %key, "Analysis started");
        Ok(())
    }

    /// Ask a running job to stop. Unknown keys are ignored.
    pub fn cancel(&self, key: &str) {
        match self.inner.jobs().get(key) {
            Some(job) => {
                job.cancel_requested.store(true, Ordering::SeqCst);
                info!(key, state = %job.state(), "Analysis cancellation requested");
            }
            None => debug!(key, "Cancel for unknown analysis"),
        }
    }

    pub fn status(&self, key: &str) -> AnalysisState {
        self.inner
            .jobs()
            .get(key)
            .map(|job| job.state())
            .unwrap_or(AnalysisState::NotRunning)
    }

    /// Remove the working directory of `key`.
    pub fn cleanup_workspace(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let workdir = self.inner.workdir(key);
        info!(key, workdir = %workdir.display(), "Removing analysis workspace");
        self.inner.executor.delete_path(&workdir)
    }

    /// Whether `server` accepts the credentials and runs a supported
    /// client version. Failures read as unavailable.
    pub fn is_backend_available(&self, server: &AnalysisServer) -> bool {
        let executor = &self.inner.executor;
        let workdir = match executor.create_temp_directory() {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "No scratch directory for backend check");
                return false;
            }
        };
        let result = self.inner.bdstool.check_backend(server, &workdir);
        if let Err(e) = executor.delete_path(&workdir) {
            debug!(workdir = %workdir.display(), error = %e, "Scratch directory left behind");
        }
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(host = %server.host, port = server.port, error = %e, "Analysis backend unavailable");
                false
            }
        }
    }

    /// Keys with a registered job.
    pub fn running(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.jobs().keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Removes the job from the registry when the job thread ends, including
/// by unwinding.
struct Registration<'a> {
    inner: &'a ManagerInner,
    key: &'a str,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.inner.jobs().remove(self.key);
    }
}

impl ManagerInner {
    fn jobs(&self) -> MutexGuard<'_, HashMap<String, Arc<AnalysisJob>>> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn workdir(&self, key: &str) -> PathBuf {
        self.settings.root.join(key)
    }

    /// Job thread body: run, record the terminal state, notify, deregister.
    fn run(&self, job: Arc<AnalysisJob>, request: AnalysisRequest) {
        let _registration = Registration {
            inner: self,
            key: &job.key,
        };
        let (state, outcome) = match self.execute(&job, &request) {
            Ok(JobEnd::Completed) if job.cancelled() => {
                (AnalysisState::Cancelled, AnalysisOutcome::Cancelled)
            }
            Ok(JobEnd::Completed) => (AnalysisState::Completed, AnalysisOutcome::Completed),
            Ok(JobEnd::Cancelled) => (AnalysisState::Cancelled, AnalysisOutcome::Cancelled),
            Err(e) if job.cancelled() => {
                debug!(key = %job.key, error = %e, "Error after cancellation");
                (AnalysisState::Cancelled, AnalysisOutcome::Cancelled)
            }
            Err(e) => {
                error!(key = %job.key, phase = %job.state(), error = %e, "Analysis failed");
                (AnalysisState::Exception, AnalysisOutcome::Error)
            }
        };
        job.set_state(state);
        info!(key = %job.key, %outcome, "Analysis finished");
        self.notifier.notify(&job.key, outcome);
    }

    fn execute(&self, job: &AnalysisJob, request: &AnalysisRequest) -> Result<JobEnd> {
        let workdir = self.prepare_workdir(&job.key)?;

        job.set_state(AnalysisState::Checkout);
        self.adapter.checkout_repository(
            &request.repository_path,
            &request.relative_path,
            &workdir,
        )?;
        if job.cancelled() {
            return Ok(JobEnd::Cancelled);
        }

        job.set_state(AnalysisState::Login);
        self.bdstool.login(&request.server, &workdir)?;
        if job.cancelled() {
            return Ok(JobEnd::Cancelled);
        }

        job.set_state(AnalysisState::Attach);
        self.bdstool.attach(&job.key, &workdir)?;
        if job.cancelled() {
            return Ok(JobEnd::Cancelled);
        }

        job.set_state(AnalysisState::Analyze);
        if self.analyze(job, &workdir)? == JobEnd::Cancelled || job.cancelled() {
            return Ok(JobEnd::Cancelled);
        }

        job.set_state(AnalysisState::Upload);
        self.bdstool.upload(&workdir)?;
        Ok(JobEnd::Completed)
    }

    fn prepare_workdir(&self, key: &str) -> Result<PathBuf> {
        let root = &self.settings.root;
        let owner = self.settings.owner.as_str();
        if !self.executor.path_exists(root) {
            self.executor.create_path(root)?;
            self.executor.set_user_on_path(owner, root)?;
            self.executor.set_permissions(root, modes::SHARED_DIR, true)?;
        }
        let workdir = self.workdir(key);
        self.executor.create_path(&workdir)?;
        self.executor.set_user_on_path(owner, &workdir)?;
        Ok(workdir)
    }

    fn analyze(&self, job: &AnalysisJob, workdir: &Path) -> Result<JobEnd> {
        let mut process = self.bdstool.start_analysis(workdir)?;
        loop {
            if let Some(code) = process.try_wait()? {
                if code != 0 {
                    return Err(IntegrationError::privileged(format!(
                        "{} analyze exited with status {}",
                        self.bdstool.binary(),
                        code
                    ))
                    .with_code(ErrorCode::AnalysisProcessFailed));
                }
                return Ok(JobEnd::Completed);
            }
            if job.cancelled() {
                info!(key = %job.key, "Killing analyzer");
                process.kill()?;
                return Ok(JobEnd::Cancelled);
            }
            thread::sleep(self.settings.poll_interval);
        }
    }
}
