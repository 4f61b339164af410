//! Repository lifecycle adapters.
//!
//! One [`Adapter`] value serves a daemon instance. The lifecycle contract is
//! shared; CVS, Subversion and Clearcase differ in how they provision and
//! probe repositories. Adapters that keep OS group membership in sync also
//! expose a [`GroupSync`] capability.

mod base;
pub mod clearcase;
pub mod cvs;
pub mod subversion;
pub mod version;

pub use base::{AdapterContext, FAKE_WINDOWS_SCMROOT, MARKER_FILE, RepositoryBase};
pub use clearcase::ClearcaseAdapter;
pub use cvs::{CvsAdapter, CvsFlavor};
pub use subversion::SubversionAdapter;

use scm_common::errors::{IntegrationError, Result};
use scm_common::executor::PrivilegedExecutor;
use scm_common::types::{AccessLevel, AdapterKind};
use scm_common::util::missing_ignore_case;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Message carried by every failed path probe.
pub const INVALID_PATH: &str = "path doesn't exist";

/// Repository lifecycle operations.
pub trait Adapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    /// Shared state and helpers.
    fn base(&self) -> &RepositoryBase;

    /// Bind this repository root to `system_id`. Fails when the host
    /// platform is unsupported or the root is bound to another system.
    fn initialize_external_system(&self, _system_id: &str) -> Result<()> {
        self.base().check_platform(self.kind())
    }

    fn delete_external_system(&self, _system_id: &str) -> Result<()> {
        Ok(())
    }

    /// Check the caller's adapter type string and the installed tool.
    fn verify_external_system(&self, adapter_type: &str) -> Result<()>;

    /// Create a repository at `dir`; returns the path as the caller should
    /// record it.
    fn create_repository(
        &self,
        group: &str,
        dir: &str,
        system_id: &str,
        base_url: &str,
    ) -> Result<String>;

    /// Re-apply ownership and permissions and (re)install triggers.
    fn setup_repository(&self, system_id: &str, group: &str, dir: &str) -> Result<()>;

    fn set_repository_access_level(
        &self,
        dir: &str,
        repository_id: &str,
        level: AccessLevel,
    ) -> Result<()>;

    /// Current access level, derived from the path's owning group.
    fn access_level(&self, _repository_id: &str, _dir: &str) -> Result<AccessLevel> {
        Err(IntegrationError::unsupported(format!(
            "{} does not report access levels",
            self.kind()
        )))
    }

    fn verify_path(
        &self,
        project_id: &str,
        repository_id: &str,
        repository_path: &str,
        relative_path: &str,
    ) -> Result<()>;

    fn checkout_repository(
        &self,
        repository_path: &str,
        relative_path: &str,
        dest_dir: &Path,
    ) -> Result<()>;

    /// Compress the repository into the archive root and remove it.
    /// `false` means the repository was left in place.
    fn archive_repository(&self, repository_path: &str) -> bool {
        let base = self.base();
        base.archive(&base.resolve_repository_dir(repository_path))
    }

    fn archive_root_path(&self) -> PathBuf {
        self.base().archive_root()
    }

    fn group_sync(&self) -> Option<&dyn GroupSync> {
        None
    }
}

/// Keeps an OS group in step with the caller's membership list.
pub trait GroupSync: Send + Sync {
    /// Add `users` to `group`, creating the group and missing users.
    /// Returns the users that had to be created.
    fn add_users_to_access_group(&self, users: &[String], group: &str) -> Result<Vec<String>>;

    fn remove_users_from_access_group(&self, users: &[String], group: &str) -> Result<()>;

    /// Make `group` contain exactly `users`. Returns the users created.
    fn set_access_list(&self, users: &[String], group: &str) -> Result<Vec<String>>;

    fn list_group_members(&self, group: &str) -> Result<Vec<String>>;
}

/// [`GroupSync`] against real OS groups.
pub struct OsGroupSync {
    executor: Arc<dyn PrivilegedExecutor>,
}

impl OsGroupSync {
    pub fn new(executor: Arc<dyn PrivilegedExecutor>) -> Self {
        Self { executor }
    }
}

fn lowered(users: &[String]) -> Vec<String> {
    users.iter().map(|u| u.to_lowercase()).collect()
}

impl GroupSync for OsGroupSync {
    fn add_users_to_access_group(&self, users: &[String], group: &str) -> Result<Vec<String>> {
        info!(group, users = ?users, "Adding users to access group");
        let users = lowered(users);
        self.executor.ensure_group_exists(group)?;
        let created = self.executor.create_users_if_missing(&users)?;
        if !users.is_empty() {
            self.executor.add_users_to_group(group, &users)?;
        }
        Ok(created)
    }

    fn remove_users_from_access_group(&self, users: &[String], group: &str) -> Result<()> {
        info!(group, users = ?users, "Removing users from access group");
        if users.is_empty() {
            return Ok(());
        }
        self.executor
            .remove_users_from_group(group, &lowered(users))
    }

    fn set_access_list(&self, users: &[String], group: &str) -> Result<Vec<String>> {
        let existing = match self.executor.list_users_in_group(group) {
            Ok(members) => members,
            Err(e) => {
                debug!(group, error = %e, "Group not listable, creating it");
                self.executor.create_group(group).map_err(|err| {
                    IntegrationError::privileged(format!("setAccessList({}) failed", group))
                        .with_source(err)
                })?;
                Vec::new()
            }
        };

        let to_remove = missing_ignore_case(&existing, users);
        let to_add = missing_ignore_case(users, &existing);
        debug!(group, add = ?to_add, remove = ?to_remove, "Synchronizing access list");

        self.remove_users_from_access_group(&to_remove, group)?;
        self.add_users_to_access_group(&to_add, group)
    }

    fn list_group_members(&self, group: &str) -> Result<Vec<String>> {
        self.executor.list_users_in_group(group)
    }
}

/// Accepts group sync requests and changes nothing.
pub struct NoopGroupSync;

impl GroupSync for NoopGroupSync {
    fn add_users_to_access_group(&self, _users: &[String], group: &str) -> Result<Vec<String>> {
        debug!(group, "Group sync is a no-op for this adapter");
        Ok(Vec::new())
    }

    fn remove_users_from_access_group(&self, _users: &[String], _group: &str) -> Result<()> {
        Ok(())
    }

    fn set_access_list(&self, _users: &[String], _group: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn list_group_members(&self, _group: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Build the adapter selected by the daemon configuration.
pub fn build_adapter(context: AdapterContext) -> Arc<dyn Adapter> {
    let kind = context.config.daemon.adapter;
    info!(adapter = %kind, root = %context.config.repository.root.display(), "Building adapter");
    match kind {
        AdapterKind::CvsSsh => Arc::new(CvsAdapter::new(context, CvsFlavor::Ssh)),
        AdapterKind::CvsPserver => Arc::new(CvsAdapter::new(context, CvsFlavor::Pserver)),
        AdapterKind::WandiscoCvs => Arc::new(CvsAdapter::new(context, CvsFlavor::Wandisco)),
        AdapterKind::Subversion => Arc::new(SubversionAdapter::new(context, false)),
        AdapterKind::WandiscoSubversion => Arc::new(SubversionAdapter::new(context, true)),
        AdapterKind::Clearcase => Arc::new(ClearcaseAdapter::new(context)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::executor::mock::RecordingExecutor;
    use scm_common::config::DaemonConfig;
    use tempfile::TempDir;

    /// Temp directory layout plus a recording executor.
    pub struct Fixture {
        pub dir: TempDir,
        pub executor: Arc<RecordingExecutor>,
        pub config: DaemonConfig,
    }

    impl Fixture {
        pub fn new(kind: AdapterKind) -> Self {
            let dir = TempDir::new().unwrap();
            let executor = Arc::new(RecordingExecutor::new(dir.path().join("tmp")));
            std::fs::create_dir_all(dir.path().join("tmp")).unwrap();

            let mut config = DaemonConfig::default();
            config.daemon.adapter = kind;
            config.daemon.home_dir = dir.path().join("home");
            config.repository.root = dir.path().join("scm");
            config.repository.python_path = None;
            std::fs::create_dir_all(&config.repository.root).unwrap();

            Self {
                dir,
                executor,
                config,
            }
        }

        pub fn root(&self) -> PathBuf {
            self.config.repository.root.clone()
        }

        pub fn context(&self, is_windows: bool) -> AdapterContext {
            let executor: Arc<dyn PrivilegedExecutor> = self.executor.clone();
            AdapterContext::new(executor, Arc::new(self.config.clone())).with_windows(is_windows)
        }

        pub fn adapter(&self) -> Arc<dyn Adapter> {
            build_adapter(self.context(false))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::Fixture;
    use super::*;
    use crate::executor::mock::RecordingExecutor;
    use tempfile::TempDir;

    fn sync() -> (TempDir, Arc<RecordingExecutor>, OsGroupSync) {
        let dir = TempDir::new().unwrap();
        let executor = Arc::new(RecordingExecutor::new(dir.path()));
        let sync = OsGroupSync::new(executor.clone());
        (dir, executor, sync)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_users_creates_group_and_missing_users() {
        let (_dir, executor, sync) = sync();
        executor.add_existing_user("alice");

        let created = sync
            .add_users_to_access_group(&names(&["Alice", "bob"]), "proj1")
            .unwrap();
        assert_eq!(created, names(&["bob"]));
        assert!(executor.has_group("proj1"));
        assert_eq!(executor.members("proj1"), names(&["alice", "bob"]));
    }

    #[test]
    fn test_set_access_list_diffs_case_insensitively() {
        let (_dir, executor, sync) = sync();
        executor
            .add_existing_group("proj1", &["alice", "carol"])
            .add_existing_user("alice")
            .add_existing_user("carol");

        sync.set_access_list(&names(&["ALICE", "dave"]), "proj1")
            .unwrap();
        assert_eq!(executor.members("proj1"), names(&["alice", "dave"]));
        assert!(executor.has_user("dave"));
    }

    #[test]
    fn test_set_access_list_creates_unknown_group() {
        let (_dir, executor, sync) = sync();
        sync.set_access_list(&names(&["erin"]), "fresh").unwrap();
        assert_eq!(executor.members("fresh"), names(&["erin"]));
    }

    #[test]
    fn test_group_sync_capability_by_kind() {
        for kind in AdapterKind::ALL {
            let fixture = Fixture::new(kind);
            let adapter = fixture.adapter();
            assert_eq!(adapter.kind(), kind);
            assert_eq!(
                adapter.group_sync().is_some(),
                kind.supports_group_sync(),
                "{}",
                kind
            );
        }
    }

    #[test]
    fn test_default_archive_root() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        let adapter = fixture.adapter();
        assert_eq!(
            adapter.archive_root_path(),
            fixture.dir.path().join("home/var/scm-archive")
        );
    }
}
