//! CVS adapters: SSH, pserver and the WANdisco relay.
//!
//! All three flavours provision repositories with `cvs init` and install
//! the integration triggers by checking out `CVSROOT`, merging the managed
//! blocks into `verifymsg`, `loginfo` and `commitinfo`, and committing the
//! result back. SSH and WANdisco repositories are owned by the CVS service
//! account and a per-repository OS group; pserver repositories are owned by
//! the daemon account and readable by nobody else.

use super::base::{AdapterContext, RepositoryBase};
use super::version::{ToolVersion, parse_cvs_version};
use super::{Adapter, GroupSync, INVALID_PATH, OsGroupSync};
use scm_common::errors::{IntegrationError, Result};
use scm_common::executor::{ShellCommand, modes};
use scm_common::trigger::TriggerBlock;
use scm_common::types::{AccessLevel, AdapterKind};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Trigger files managed in every CVSROOT.
const TRIGGER_FILES: [&str; 3] = ["commitinfo", "loginfo", "verifymsg"];

/// Written over the live trigger files before the merged copies are committed.
const PLACEHOLDER: &str = "#Temporarily removed by SourceForge\n";

/// Interpreter the CVS trigger scripts are written for.
const TRIGGER_PYTHON: &str = "python2";

const GUARD_SCRIPT: &str = "sfee.sh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CvsFlavor {
    Ssh,
    Pserver,
    Wandisco,
}

impl CvsFlavor {
    pub fn kind(&self) -> AdapterKind {
        match self {
            CvsFlavor::Ssh => AdapterKind::CvsSsh,
            CvsFlavor::Pserver => AdapterKind::CvsPserver,
            CvsFlavor::Wandisco => AdapterKind::WandiscoCvs,
        }
    }

    /// Whether repositories are owned by the CVS account and an OS group.
    fn uses_groups(&self) -> bool {
        !matches!(self, CvsFlavor::Pserver)
    }
}

pub struct CvsAdapter {
    base: RepositoryBase,
    flavor: CvsFlavor,
    group_sync: Option<OsGroupSync>,
}

impl CvsAdapter {
    pub fn new(context: AdapterContext, flavor: CvsFlavor) -> Self {
        let group_sync = flavor
            .uses_groups()
            .then(|| OsGroupSync::new(context.executor.clone()));
        Self {
            base: RepositoryBase::new(context),
            flavor,
            group_sync,
        }
    }

    fn cvs_user(&self) -> &str {
        &self.base.config().identity.cvs_user
    }

    /// Account CVS commands run as; pserver runs as the daemon itself.
    fn run_user(&self) -> Option<&str> {
        self.flavor.uses_groups().then(|| self.cvs_user())
    }

    fn cvs(&self) -> ShellCommand {
        let executables = &self.base.config().executables;
        let binary = match self.flavor {
            CvsFlavor::Wandisco => &executables.cvs_relay,
            _ => &executables.cvs,
        };
        let command = ShellCommand::new(binary.as_str());
        match self.run_user() {
            Some(user) => command.run_as(user),
            None => command,
        }
    }

    fn provision(&self, group: &str, dir: &Path, system_id: &str) -> Result<()> {
        let executor = self.base.executor();
        executor.create_path(dir)?;
        if self.flavor.uses_groups() {
            executor.set_user_on_path(self.cvs_user(), dir)?;
        }
        executor.run_checked(&self.cvs().arg("-d").path_arg(dir).arg("init"))?;
        if self.flavor.uses_groups() {
            executor.set_group_on_path(group, dir)?;
            executor.set_user_on_path(self.cvs_user(), dir)?;
            executor.set_permissions(dir, modes::REPOSITORY, false)?;
        }
        self.setup_dir(system_id, group, dir)
    }

    fn setup_dir(&self, system_id: &str, group: &str, dir: &Path) -> Result<()> {
        let executor = self.base.executor();
        if self.flavor.uses_groups() {
            executor.ensure_group_exists(group)?;
            executor.set_group_on_path(group, dir)?;
            executor.set_user_on_path(self.cvs_user(), dir)?;
            executor.set_permissions(dir, modes::REPOSITORY, false)?;
            self.setup_triggers(system_id, dir)
        } else {
            self.setup_triggers(system_id, dir)?;
            executor.set_permissions(dir, modes::OWNER_ONLY, true)
        }
    }

    /// Install the managed trigger blocks into `repo`'s CVSROOT. Group-owned
    /// repositories are locked to the owner while this runs.
    #[instrument(skip(self), fields(flavor = ?self.flavor))]
    fn setup_triggers(&self, system_id: &str, repo: &Path) -> Result<()> {
        let executor = self.base.executor();
        if !self.flavor.uses_groups() {
            return self.install_triggers(system_id, repo);
        }

        executor.set_permissions(repo, modes::LOCKED, false)?;
        let result = self
            .fix_cvsroot_permissions(repo)
            .and_then(|()| self.install_triggers(system_id, repo));
        let unlocked = executor.set_permissions(repo, modes::REPOSITORY, false);
        match (result, unlocked) {
            (Err(e), Err(unlock)) => {
                warn!(repo = %repo.display(), error = %unlock, "Failed to unlock repository");
                Err(e)
            }
            (result, unlocked) => result.and(unlocked),
        }
    }

    fn fix_cvsroot_permissions(&self, repo: &Path) -> Result<()> {
        let cvsroot = repo.join("CVSROOT");
        if !cvsroot.is_dir() {
            debug!(cvsroot = %cvsroot.display(), "No CVSROOT to fix");
            return Ok(());
        }
        let entries =
            fs::read_dir(&cvsroot).map_err(|e| IntegrationError::io("list", &cvsroot, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| IntegrationError::io("list", &cvsroot, e))?;
            let path = entry.path();
            let mode = if path.is_dir() {
                modes::REPOSITORY
            } else {
                match entry.file_name().to_str() {
                    Some("val-tags") | Some("history") => modes::GROUP_READ_WRITE,
                    _ => modes::GROUP_READ,
                }
            };
            self.base.executor().set_permissions(&path, mode, false)?;
        }
        Ok(())
    }

    fn install_triggers(&self, system_id: &str, repo: &Path) -> Result<()> {
        let executor = self.base.executor();
        let workdir = executor.create_temp_directory()?;
        let result = self.commit_triggers(system_id, repo, &workdir);
        if let Err(e) = executor.delete_path(&workdir) {
            warn!(workdir = %workdir.display(), error = %e, "Failed to remove trigger working copy");
        }
        match &result {
            Ok(()) => info!(repo = %repo.display(), system_id, "Installed CVS triggers"),
            Err(e) => warn!(repo = %repo.display(), error = %e, "CVS trigger install failed"),
        }
        result
    }

    fn commit_triggers(&self, system_id: &str, repo: &Path, workdir: &Path) -> Result<()> {
        let executor = self.base.executor();
        if let Some(user) = self.run_user() {
            executor.set_user_on_path(user, workdir)?;
        }
        executor.set_permissions(workdir, modes::LOCKED, false)?;

        executor.run_checked(
            &self
                .cvs()
                .arg("-d")
                .path_arg(repo)
                .args(["checkout", "CVSROOT"])
                .current_dir(workdir),
        )?;

        let live = repo.join("CVSROOT");
        let checked_out = workdir.join("CVSROOT");
        for (file, block) in self.trigger_blocks(system_id, repo) {
            executor.merge_trigger(&live.join(file), &checked_out.join(file), &block)?;
        }

        let mut committed: Vec<String> =
            TRIGGER_FILES.iter().map(|f| format!("CVSROOT/{}", f)).collect();
        if self.flavor == CvsFlavor::Wandisco {
            self.install_guard_script(&live, &checked_out)?;
            committed.push("CVSROOT/checkoutlist".to_string());
            committed.push(format!("CVSROOT/{}", GUARD_SCRIPT));
        }

        for file in TRIGGER_FILES {
            let path = live.join(file);
            executor.set_permissions(&path, "u=rw", false)?;
            executor.create_file(&path, PLACEHOLDER)?;
        }

        let message = format!(
            "SF: Adding verifyMessage and logInfo triggers {}",
            repo.display()
        );
        executor.run_checked(
            &self
                .cvs()
                .arg("-d")
                .path_arg(repo)
                .args(["commit", "-f", "-m"])
                .arg(message)
                .args(committed)
                .current_dir(workdir),
        )?;
        Ok(())
    }

    /// Managed block for each trigger file.
    fn trigger_blocks(&self, system_id: &str, repo: &Path) -> Vec<(&'static str, TriggerBlock)> {
        let config = self.base.config();
        let scripts = config.scripts_dir();
        let scripts = scripts.display();
        let is_wandisco = self.flavor == CvsFlavor::Wandisco;
        let prefix = if is_wandisco {
            format!("{}/CVSROOT/{} ", repo.display(), GUARD_SCRIPT)
        } else {
            String::new()
        };

        let mut env = TriggerBlock::new().line(format!(
            "export SOURCEFORGE_PROPERTIES_PATH='{}'",
            config.properties_path().display()
        ));
        if let Some(python_path) = &config.repository.python_path {
            env = env.line(format!("export PYTHONPATH='{}'", python_path));
        }

        vec![
            (
                "verifymsg",
                env.clone().line(format!(
                    ".*\t{}{} {}/VerifyMsg.py {} {} %l",
                    prefix, TRIGGER_PYTHON, scripts, is_wandisco, system_id
                )),
            ),
            (
                "loginfo",
                env.clone().line(format!(
                    "ALL\t{}{} {}/LogInfo.py {} {} %{{sVv}}",
                    prefix, TRIGGER_PYTHON, scripts, is_wandisco, system_id
                )),
            ),
            (
                "commitinfo",
                env.line(format!(
                    "ALL\t{}{} {}/CommitInfo.py {} {} %r/%p",
                    prefix, TRIGGER_PYTHON, scripts, is_wandisco, system_id
                )),
            ),
        ]
    }

    /// Add the properties-file guard to the checked-out CVSROOT and list it
    /// in `checkoutlist` so CVS keeps a live copy.
    fn install_guard_script(&self, live: &Path, checked_out: &Path) -> Result<()> {
        let executor = self.base.executor();
        let script = checked_out.join(GUARD_SCRIPT);
        let content = format!(
            "#!/bin/bash\nif [ -f \"{}\" ]; then\n  $*\nfi\ntrue\n",
            self.base.config().properties_path().display()
        );
        executor.create_file(&script, &content)?;
        executor.set_user_on_path(self.cvs_user(), &script)?;
        executor.set_permissions(&script, modes::REPOSITORY, false)?;

        // Fails harmlessly when the file is already under version control.
        let added = executor.run(&self.cvs().args(["add", GUARD_SCRIPT]).current_dir(checked_out))?;
        if !added.success() {
            debug!(output = %added.output_summary(), "cvs add of guard script was refused");
        }

        executor.merge_trigger(
            &live.join("checkoutlist"),
            &checked_out.join("checkoutlist"),
            &TriggerBlock::new().line(GUARD_SCRIPT),
        )
    }

    fn check_version(&self) -> Result<()> {
        let output = self
            .base
            .executor()
            .run_checked(&self.cvs().arg("-version"))?;
        let minimum = ToolVersion::new(&[1, 11, 0]);
        match parse_cvs_version(&output.stdout) {
            None => Err(IntegrationError::unsupported("No cvs version found")),
            Some(version) if !version.at_least(&minimum) => Err(IntegrationError::unsupported(
                format!("VERSION (requires {} or better): {}", minimum, version),
            )),
            Some(version) => {
                debug!(%version, "CVS version accepted");
                Ok(())
            }
        }
    }
}

impl Adapter for CvsAdapter {
    fn kind(&self) -> AdapterKind {
        self.flavor.kind()
    }

    fn base(&self) -> &RepositoryBase {
        &self.base
    }

    fn initialize_external_system(&self, system_id: &str) -> Result<()> {
        self.base.check_platform(self.kind())?;
        if self.flavor == CvsFlavor::Pserver {
            self.base.bind_external_system(system_id)?;
        }
        Ok(())
    }

    fn delete_external_system(&self, _system_id: &str) -> Result<()> {
        if self.flavor == CvsFlavor::Pserver {
            self.base.unbind_external_system()?;
        }
        Ok(())
    }

    fn verify_external_system(&self, adapter_type: &str) -> Result<()> {
        let accepted = match self.flavor {
            CvsFlavor::Wandisco => adapter_type == "WANdiscoCVS",
            _ => adapter_type.contains("CVS"),
        };
        if !accepted {
            return Err(IntegrationError::unsupported(format!(
                "Adapter type {} is not supported by {}",
                adapter_type,
                self.kind()
            )));
        }
        self.check_version()
    }

    #[instrument(skip(self), fields(adapter = %self.kind()))]
    fn create_repository(
        &self,
        group: &str,
        dir: &str,
        system_id: &str,
        _base_url: &str,
    ) -> Result<String> {
        let executor = self.base.executor();
        let path = self.base.resolve_repository_dir(dir);
        if executor.path_exists(&path) {
            return Err(IntegrationError::already_exists(path.display()));
        }

        let mut created_group = false;
        let result = (|| {
            if self.flavor.uses_groups() {
                created_group = executor.ensure_group_exists(group)?.was_created();
            }
            self.provision(group, &path, system_id)
        })();

        if let Err(e) = result {
            warn!(dir = %path.display(), error = %e, "Repository creation failed, rolling back");
            if created_group {
                if let Err(cleanup) = executor.delete_group(group) {
                    warn!(group, error = %cleanup, "Rollback could not delete group");
                }
            }
            if let Err(cleanup) = executor.delete_path(&path) {
                warn!(dir = %path.display(), error = %cleanup, "Rollback could not delete path");
            }
            return Err(IntegrationError::privileged(format!(
                "Failed to create repository {}: {}",
                path.display(),
                e
            ))
            .with_source(e));
        }

        info!(dir = %path.display(), group, "Created CVS repository");
        Ok(self.base.report_path(&path))
    }

    fn setup_repository(&self, system_id: &str, group: &str, dir: &str) -> Result<()> {
        let path = self.base.resolve_repository_dir(dir);
        self.setup_dir(system_id, group, &path)
    }

    fn set_repository_access_level(
        &self,
        dir: &str,
        repository_id: &str,
        level: AccessLevel,
    ) -> Result<()> {
        if !self.flavor.uses_groups() {
            return Ok(());
        }
        let group = level.target_group(repository_id);
        let path = self.base.resolve_repository_dir(dir);
        info!(dir = %path.display(), %level, group, "Setting repository access level");
        self.base.executor().set_group_on_path(group, &path)
    }

    fn access_level(&self, _repository_id: &str, dir: &str) -> Result<AccessLevel> {
        if !self.flavor.uses_groups() {
            return Err(IntegrationError::unsupported(format!(
                "{} does not report access levels",
                self.kind()
            )));
        }
        let path = self.base.resolve_repository_dir(dir);
        let group = self.base.executor().file_group(&path)?;
        Ok(AccessLevel::from_group(group.trim()))
    }

    fn verify_path(
        &self,
        _project_id: &str,
        _repository_id: &str,
        repository_path: &str,
        relative_path: &str,
    ) -> Result<()> {
        let relative = relative_path.trim();
        if relative.is_empty() || relative == "/" {
            return Err(IntegrationError::invalid_path(INVALID_PATH));
        }
        if relative.split(['/', '\\']).any(|part| part == "..") {
            warn!(relative, "Rejected path leaving the repository");
            return Err(IntegrationError::invalid_path(INVALID_PATH));
        }
        let target: PathBuf = self
            .base
            .resolve_repository_dir(repository_path)
            .join(relative.trim_start_matches('/'));
        if self.base.executor().path_exists(&target) {
            Ok(())
        } else {
            debug!(path = %target.display(), "Path not found in repository");
            Err(IntegrationError::invalid_path(INVALID_PATH))
        }
    }

    fn checkout_repository(
        &self,
        repository_path: &str,
        relative_path: &str,
        dest_dir: &Path,
    ) -> Result<()> {
        let root = self.base.resolve_repository_dir(repository_path);
        let binary = match self.flavor {
            CvsFlavor::Wandisco => &self.base.config().executables.cvs_relay,
            _ => &self.base.config().executables.cvs,
        };
        let command = ShellCommand::new(binary.as_str())
            .arg("-d")
            .path_arg(&root)
            .arg("checkout")
            .arg(relative_path.trim_start_matches('/'))
            .current_dir(dest_dir);
        self.base.executor().run_checked(&command)?;
        Ok(())
    }

    fn group_sync(&self) -> Option<&dyn GroupSync> {
        self.group_sync.as_ref().map(|sync| sync as &dyn GroupSync)
    }
}
