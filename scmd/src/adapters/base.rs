//! State and helpers shared by every adapter.

use chrono::Local;
use flate2::Compression;
use flate2::write::GzEncoder;
use scm_common::config::DaemonConfig;
use scm_common::errors::{ErrorCode, IntegrationError, Result};
use scm_common::executor::PrivilegedExecutor;
use scm_common::types::AdapterKind;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Marker file binding a repository root to one external system.
pub const MARKER_FILE: &str = ".scm.properties";

/// Prefix the application server uses for repositories on Windows hosts.
pub const FAKE_WINDOWS_SCMROOT: &str = "/windows-scmroot";

const SYSTEM_ID_KEY: &str = "external_system_id";

/// Everything an adapter needs from the daemon.
#[derive(Clone)]
pub struct AdapterContext {
    pub executor: Arc<dyn PrivilegedExecutor>,
    pub config: Arc<DaemonConfig>,
    pub is_windows: bool,
}

impl AdapterContext {
    pub fn new(executor: Arc<dyn PrivilegedExecutor>, config: Arc<DaemonConfig>) -> Self {
        Self {
            executor,
            config,
            is_windows: cfg!(windows),
        }
    }

    pub fn with_windows(mut self, is_windows: bool) -> Self {
        self.is_windows = is_windows;
        self
    }
}

pub struct RepositoryBase {
    context: AdapterContext,
}

impl RepositoryBase {
    pub fn new(context: AdapterContext) -> Self {
        Self { context }
    }

    pub fn executor(&self) -> &dyn PrivilegedExecutor {
        self.context.executor.as_ref()
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.context.config
    }

    pub fn is_windows(&self) -> bool {
        self.context.is_windows
    }

    pub fn check_platform(&self, kind: AdapterKind) -> Result<()> {
        if self.is_windows() && !kind.supports_windows() {
            return Err(IntegrationError::unsupported(
                "This integration server SCM type is not supported on Windows.",
            ));
        }
        Ok(())
    }

    pub fn marker_path(&self) -> PathBuf {
        self.config().repository.root.join(MARKER_FILE)
    }

    /// System id recorded in the marker file, if any.
    pub fn bound_system_id(&self) -> Result<Option<String>> {
        let path = self.marker_path();
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .map_err(|e| IntegrationError::io("read marker", &path, e))?;
        Ok(text.lines().find_map(|line| {
            let (key, value) = line.split_once('=')?;
            (key.trim() == SYSTEM_ID_KEY).then(|| value.trim().to_string())
        }))
    }

    /// Record `system_id` in the marker file. Re-binding the same id is a
    /// no-op; a different id is refused.
    pub fn bind_external_system(&self, system_id: &str) -> Result<()> {
        match self.bound_system_id()? {
            Some(existing) if existing == system_id => {
                debug!(system_id, "Repository root already bound");
                return Ok(());
            }
            Some(existing) => {
                warn!(existing = %existing, requested = system_id, "Repository root bound to another system");
                return Err(IntegrationError::unsupported(
                    "Unable to initialize external system. Another integration already exists.",
                )
                .with_code(ErrorCode::RepoSystemConflict));
            }
            None => {}
        }

        let root = &self.config().repository.root;
        fs::create_dir_all(root).map_err(|e| IntegrationError::io("create", root, e))?;
        let path = self.marker_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| IntegrationError::io("open marker", &path, e))?;
        write!(file, "\n{}={}\n", SYSTEM_ID_KEY, system_id)
            .map_err(|e| IntegrationError::io("write marker", &path, e))?;
        info!(system_id, marker = %path.display(), "Bound repository root");
        Ok(())
    }

    pub fn unbind_external_system(&self) -> Result<()> {
        let path = self.marker_path();
        if path.exists() {
            fs::remove_file(&path).map_err(|e| IntegrationError::io("remove marker", &path, e))?;
            info!(marker = %path.display(), "Removed repository root binding");
        }
        Ok(())
    }

    /// Map a caller path to the real directory. On Windows hosts the
    /// virtual prefix resolves under the repository root.
    pub fn resolve_repository_dir(&self, dir: &str) -> PathBuf {
        if self.is_windows() && dir.starts_with(FAKE_WINDOWS_SCMROOT) {
            let name = dir.trim_end_matches('/').rsplit('/').next().unwrap_or("");
            return self.config().repository.root.join(name);
        }
        PathBuf::from(dir)
    }

    /// Path as the caller should record it.
    pub fn report_path(&self, dir: &Path) -> String {
        if self.is_windows() {
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return format!("{}/{}", FAKE_WINDOWS_SCMROOT, name);
        }
        dir.display().to_string()
    }

    pub fn archive_root(&self) -> PathBuf {
        self.config().archive_root()
    }

    /// Write `<name>-<timestamp>.tar.gz` under the archive root, then
    /// delete `dir`. A missing `dir` counts as archived.
    pub fn archive(&self, dir: &Path) -> bool {
        if !self.executor().path_exists(dir) {
            debug!(dir = %dir.display(), "Nothing to archive");
            return true;
        }

        let archive_root = self.archive_root();
        if let Err(e) = self.executor().create_path(&archive_root) {
            warn!(root = %archive_root.display(), error = %e, "Cannot create archive root");
            return false;
        }

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repository".to_string());
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let archive = archive_root.join(format!("{}-{}.tar.gz", name, stamp));

        if let Err(e) = write_tarball(&archive, &name, dir) {
            warn!(dir = %dir.display(), error = %e, "Archive failed");
            if let Err(e) = fs::remove_file(&archive) {
                debug!(archive = %archive.display(), error = %e, "No partial archive to remove");
            }
            return false;
        }

        // The tarball may now be the only complete copy; it stays even if
        // the repository cannot be removed.
        if let Err(e) = self.executor().delete_path(dir) {
            warn!(
                dir = %dir.display(),
                archive = %archive.display(),
                error = %e,
                "Repository left in place after archiving"
            );
            return false;
        }
        info!(dir = %dir.display(), archive = %archive.display(), "Archived repository");
        true
    }
}

fn write_tarball(archive: &Path, name: &str, dir: &Path) -> Result<()> {
    let io_err = |e| {
        IntegrationError::io("archive", archive, e).with_code(ErrorCode::RepoArchiveFailed)
    };
    let file = File::create(archive).map_err(io_err)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.append_dir_all(name, dir).map_err(io_err)?;
    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;
    use super::*;
    use flate2::read::GzDecoder;
    use scm_common::errors::ErrorKind;

    fn base(fixture: &Fixture, windows: bool) -> RepositoryBase {
        RepositoryBase::new(fixture.context(windows))
    }

    #[test]
    fn test_bind_is_idempotent_and_exclusive() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        let base = base(&fixture, false);

        base.bind_external_system("sys1").unwrap();
        base.bind_external_system("sys1").unwrap();
        assert_eq!(base.bound_system_id().unwrap().as_deref(), Some("sys1"));

        let err = base.bind_external_system("sys2").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AdapterUnsupported);
        assert_eq!(err.code(), ErrorCode::RepoSystemConflict);

        let text = fs::read_to_string(base.marker_path()).unwrap();
        assert_eq!(text.matches("external_system_id=").count(), 1);

        base.unbind_external_system().unwrap();
        assert!(base.bound_system_id().unwrap().is_none());
        base.bind_external_system("sys2").unwrap();
    }

    #[test]
    fn test_marker_keeps_other_properties() {
        let fixture = Fixture::new(AdapterKind::Clearcase);
        let base = base(&fixture, false);
        fs::write(base.marker_path(), "owner=ops").unwrap();

        base.bind_external_system("sys1").unwrap();
        let text = fs::read_to_string(base.marker_path()).unwrap();
        assert!(text.starts_with("owner=ops\n"));
        assert_eq!(base.bound_system_id().unwrap().as_deref(), Some("sys1"));
    }

    #[test]
    fn test_windows_platform_check() {
        let fixture = Fixture::new(AdapterKind::CvsSsh);
        let err = base(&fixture, true)
            .check_platform(AdapterKind::CvsSsh)
            .unwrap_err();
        assert_eq!(
            err.message(),
            "This integration server SCM type is not supported on Windows."
        );
        assert!(base(&fixture, true).check_platform(AdapterKind::Subversion).is_ok());
        assert!(base(&fixture, false).check_platform(AdapterKind::CvsSsh).is_ok());
    }

    #[test]
    fn test_windows_virtual_paths() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        let windows = base(&fixture, true);
        assert_eq!(
            windows.resolve_repository_dir("/windows-scmroot/proj1"),
            fixture.root().join("proj1")
        );
        assert_eq!(
            windows.report_path(&fixture.root().join("proj1")),
            "/windows-scmroot/proj1"
        );

        let unix = base(&fixture, false);
        assert_eq!(
            unix.resolve_repository_dir("/windows-scmroot/proj1"),
            PathBuf::from("/windows-scmroot/proj1")
        );
        assert_eq!(unix.report_path(Path::new("/var/scm/p1")), "/var/scm/p1");
    }

    #[test]
    fn test_archive_writes_tarball_and_removes_repository() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        let base = base(&fixture, false);
        let repo = fixture.root().join("proj1");
        fs::create_dir_all(repo.join("db")).unwrap();
        fs::write(repo.join("db/current"), "7\n").unwrap();

        assert!(base.archive(&repo));
        assert!(!repo.exists());

        let entries: Vec<_> = fs::read_dir(base.archive_root())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries.len(), 1);
        let name = &entries[0];
        assert!(name.starts_with("proj1-"));
        assert!(name.ends_with(".tar.gz"));
        // proj1-YYYYmmdd_HHMMSS.tar.gz
        assert_eq!(name.len(), "proj1-".len() + 15 + ".tar.gz".len());

        let file = File::open(base.archive_root().join(name)).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let paths: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert!(paths.iter().any(|p| p == "proj1/db/current"));
    }

    #[test]
    fn test_archive_missing_repository_is_success() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        assert!(base(&fixture, false).archive(&fixture.root().join("gone")));
    }

    #[test]
    fn test_archive_kept_when_repository_cannot_be_removed() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        let base = base(&fixture, false);
        let repo = fixture.root().join("proj1");
        fs::create_dir_all(repo.join("db")).unwrap();
        fs::write(repo.join("db/current"), "7\n").unwrap();
        fixture.executor.fail_operation("delete_path");

        assert!(!base.archive(&repo));
        assert!(repo.join("db/current").exists());
        let archives: Vec<_> = fs::read_dir(base.archive_root())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(archives.len(), 1);
        assert!(fs::metadata(&archives[0]).unwrap().len() > 0);
    }

    #[test]
    fn test_archive_fails_when_root_is_a_file() {
        let mut fixture = Fixture::new(AdapterKind::Subversion);
        let blocker = fixture.dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        fixture.config.repository.archive_root = Some(blocker.join("archive"));

        let repo = fixture.root().join("proj1");
        fs::create_dir_all(&repo).unwrap();
        assert!(!base(&fixture, false).archive(&repo));
        assert!(repo.exists());
    }
}
