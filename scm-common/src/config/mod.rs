//! Configuration for the SCM integration daemon.
//!
//! Configuration comes from three layers, lowest precedence first:
//! built-in defaults, a TOML file, and `SCMD_*` environment variables.
//! [`DaemonConfig::load`] applies all three; [`validate::validate_config`]
//! reports problems without failing fast.

pub mod env;
pub mod source;
pub mod validate;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};
pub use validate::{ConfigWarning, Severity, validate_config};

use crate::errors::{ErrorCode, IntegrationError};
use crate::types::AdapterKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Default number of seconds between analysis liveness polls.
pub const DEFAULT_ANALYSIS_POLL_SECS: u64 = 5;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid environment configuration: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Env(Vec<EnvError>),

    #[error("No signing secret configured (set daemon.shared_secret or daemon.shared_secret_file)")]
    MissingSecret,
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConfigError::Read { .. } => ErrorCode::ConfigReadError,
            ConfigError::Parse { .. } => ErrorCode::ConfigParseError,
            ConfigError::Env(_) => ErrorCode::ConfigEnvError,
            ConfigError::MissingSecret => ErrorCode::ConfigValidationError,
        }
    }
}

impl From<ConfigError> for IntegrationError {
    fn from(err: ConfigError) -> Self {
        let code = err.code();
        IntegrationError::configuration(err.to_string())
            .with_code(code)
            .with_source(err)
    }
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub daemon: DaemonSection,
    pub repository: RepositorySection,
    pub executables: ExecutablesSection,
    pub identity: IdentitySection,
    pub analysis: AnalysisSection,
    pub notify: NotifySection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    /// Unix socket the daemon listens on.
    pub socket_path: PathBuf,
    pub adapter: AdapterKind,
    /// Installation root; other default paths hang off it.
    pub home_dir: PathBuf,
    /// Permitted clock skew for transaction keys; 0 disables expiry.
    pub max_clock_skew_secs: u64,
    pub shared_secret: Option<String>,
    pub shared_secret_file: Option<PathBuf>,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/scmd/scmd.sock"),
            adapter: AdapterKind::Subversion,
            home_dir: PathBuf::from("/opt/scmd"),
            max_clock_skew_secs: 0,
            shared_secret: None,
            shared_secret_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySection {
    /// Root under which repositories are created.
    pub root: PathBuf,
    /// Archive root; defaults to `<home_dir>/var/scm-archive`.
    pub archive_root: Option<PathBuf>,
    /// `svnadmin create --fs-type`.
    pub svn_fs_type: String,
    /// Repositories under this prefix also get the data-checkout hook.
    pub branding_repo: Option<PathBuf>,
    /// Directory holding the integration trigger scripts.
    pub scripts_dir: Option<PathBuf>,
    /// Properties file exported to triggers as SOURCEFORGE_PROPERTIES_PATH.
    pub properties_path: Option<PathBuf>,
    /// PYTHONPATH exported to triggers.
    pub python_path: Option<String>,
}

impl Default for RepositorySection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/var/scm"),
            archive_root: None,
            svn_fs_type: "fsfs".to_string(),
            branding_repo: None,
            scripts_dir: None,
            properties_path: None,
            python_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutablesSection {
    pub cvs: String,
    /// CVS binary used behind the WANdisco replicator.
    pub cvs_relay: String,
    pub svn: String,
    pub svnadmin: String,
    pub svnlook: String,
    pub python: String,
    pub bdstool: String,
}

impl Default for ExecutablesSection {
    fn default() -> Self {
        Self {
            cvs: "cvs".to_string(),
            cvs_relay: "cvs".to_string(),
            svn: "svn".to_string(),
            svnadmin: "svnadmin".to_string(),
            svnlook: "svnlook".to_string(),
            python: "python".to_string(),
            bdstool: "bdstool".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentitySection {
    /// Owner of CVS repositories.
    pub cvs_user: String,
    /// Web server account that owns Subversion hooks and checkouts.
    pub httpd_user: String,
    /// Owner of analysis working directories.
    pub analysis_user: String,
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            cvs_user: "nobody".to_string(),
            httpd_user: "apache".to_string(),
            analysis_user: "nobody".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSection {
    /// Analysis working directory root; defaults to `<home_dir>/blackduckSources`.
    pub root: Option<PathBuf>,
    pub poll_interval_secs: u64,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        Self {
            root: None,
            poll_interval_secs: DEFAULT_ANALYSIS_POLL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    /// Receives `{key, outcome}` when an analysis job finishes.
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    /// `text` or `json`.
    pub format: String,
    /// Daily-rolling log files are written here when set.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            directory: None,
        }
    }
}

impl DaemonConfig {
    /// Default config file location (`<config_dir>/scmd/config.toml`).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "scmd")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse a TOML document.
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read `path` if it exists, otherwise start from defaults.
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Load the file at `path` (or the default location) and apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(Self::default_path)
            .unwrap_or_else(|| PathBuf::from("scmd.toml"));
        let mut config = Self::from_file_or_default(&path)?;
        let errors = config.apply_env_overrides();
        if !errors.is_empty() {
            return Err(ConfigError::Env(errors));
        }
        Ok(config)
    }

    /// Apply `SCMD_*` overrides, returning every invalid variable.
    pub fn apply_env_overrides(&mut self) -> Vec<EnvError> {
        let mut parser = EnvParser::new();

        if let Some(path) = parser.get_path("SOCKET", "").from_environment() {
            self.daemon.socket_path = path;
        }
        if let Some(adapter) = parser.get_optional_string("ADAPTER").from_environment().flatten() {
            match adapter.parse() {
                Ok(kind) => self.daemon.adapter = kind,
                Err(_) => parser_error(&mut parser, "SCMD_ADAPTER", "adapter kind", &adapter),
            }
        }
        if let Some(home) = parser.get_path("HOME", "").from_environment() {
            self.daemon.home_dir = home;
        }
        if let Some(skew) = parser
            .get_u64_range("MAX_CLOCK_SKEW_SECS", 0, 0, 86_400)
            .from_environment()
        {
            self.daemon.max_clock_skew_secs = skew;
        }
        if let Some(secret) = parser.get_optional_string("SHARED_SECRET").from_environment() {
            self.daemon.shared_secret = secret;
        }
        if let Some(root) = parser.get_path("REPOSITORY_ROOT", "").from_environment() {
            self.repository.root = root;
        }
        if let Some(root) = parser.get_path("ARCHIVE_ROOT", "").from_environment() {
            self.repository.archive_root = Some(root);
        }
        if let Some(level) = parser.get_log_level("LOG_LEVEL", "info").from_environment() {
            self.logging.level = level;
        }
        if let Some(format) = parser.get_string("LOG_FORMAT", "text").from_environment() {
            self.logging.format = format;
        }
        if let Some(url) = parser.get_optional_string("NOTIFY_WEBHOOK").from_environment() {
            self.notify.webhook_url = url;
        }

        parser.take_errors()
    }

    pub fn archive_root(&self) -> PathBuf {
        self.repository
            .archive_root
            .clone()
            .unwrap_or_else(|| self.daemon.home_dir.join("var").join("scm-archive"))
    }

    pub fn analysis_root(&self) -> PathBuf {
        self.analysis
            .root
            .clone()
            .unwrap_or_else(|| self.daemon.home_dir.join("blackduckSources"))
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.repository
            .scripts_dir
            .clone()
            .unwrap_or_else(|| self.daemon.home_dir.join("integration"))
    }

    pub fn properties_path(&self) -> PathBuf {
        self.repository
            .properties_path
            .clone()
            .unwrap_or_else(|| self.daemon.home_dir.join("sourceforge.properties"))
    }

    /// Signing secret, from the inline value or the secret file.
    pub fn shared_secret(&self) -> Result<Vec<u8>, ConfigError> {
        if let Some(secret) = self.daemon.shared_secret.as_ref().filter(|s| !s.is_empty()) {
            return Ok(secret.as_bytes().to_vec());
        }
        match &self.daemon.shared_secret_file {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(ConfigError::MissingSecret);
                }
                Ok(trimmed.as_bytes().to_vec())
            }
            None => Err(ConfigError::MissingSecret),
        }
    }
}

fn parser_error(parser: &mut EnvParser, var: &str, expected: &str, value: &str) {
    parser.push_error(EnvError::InvalidValue {
        var: var.to_string(),
        expected: expected.to_string(),
        value: value.to_string(),
    });
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
