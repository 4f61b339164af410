//! Subversion adapters, plain and WANdisco-replicated.

use super::base::{AdapterContext, RepositoryBase};
use super::version::{ToolVersion, parse_svn_version};
use super::{Adapter, INVALID_PATH};
use scm_common::errors::{IntegrationError, Result};
use scm_common::executor::ShellCommand;
use scm_common::trigger::{HookEvent, TriggerBlock};
use scm_common::types::{AccessLevel, AdapterKind};
use std::path::Path;
use tracing::{debug, info, instrument, warn};

pub struct SubversionAdapter {
    base: RepositoryBase,
    wandisco: bool,
}

impl SubversionAdapter {
    pub fn new(context: AdapterContext, wandisco: bool) -> Self {
        Self {
            base: RepositoryBase::new(context),
            wandisco,
        }
    }

    fn httpd_user(&self) -> &str {
        &self.base.config().identity.httpd_user
    }

    fn expected_type(&self) -> &'static str {
        if self.wandisco {
            "WANdiscoSubversion"
        } else {
            "Subversion"
        }
    }

    fn provision(&self, dir: &Path, system_id: &str) -> Result<()> {
        let config = self.base.config();
        let executor = self.base.executor();
        executor.create_path(dir)?;
        executor.run_checked(
            &ShellCommand::new(config.executables.svnadmin.as_str())
                .arg("create")
                .arg(format!("--fs-type={}", config.repository.svn_fs_type))
                .path_arg(dir),
        )?;
        executor.set_user_on_path(self.httpd_user(), dir)?;
        self.install_hooks(system_id, dir)
    }

    /// Hook block for one event: environment first, then the commands.
    fn hook_block(&self, commands: &[String]) -> TriggerBlock {
        let config = self.base.config();
        let properties = config.properties_path();
        let mut block = TriggerBlock::new().line("").line(format!(
            "export SOURCEFORGE_PROPERTIES_PATH=\"{}\"",
            properties.display()
        ));
        if let Some(python_path) = &config.repository.python_path {
            block = block.line(format!("export PYTHONPATH=\"{}\"", python_path));
        }
        block = block.line("");

        if self.wandisco {
            for command in commands {
                block = block
                    .line(format!("if [ -f \"{}\" ]; then", properties.display()))
                    .line(format!("  {}", command))
                    .line("fi");
            }
            block.line("true")
        } else {
            commands.iter().fold(block, |block, command| block.line(command.as_str()))
        }
    }

    fn script_command(&self, script: &str, args: &str, system_id: &str) -> String {
        let config = self.base.config();
        format!(
            "{} \"{}/{}\" {} {}",
            config.executables.python,
            config.scripts_dir().display(),
            script,
            args,
            system_id
        )
    }

    #[instrument(skip(self))]
    fn install_hooks(&self, system_id: &str, repo: &Path) -> Result<()> {
        let executor = self.base.executor();
        let hooks = repo.join("hooks");
        if !executor.path_exists(&hooks) {
            executor.create_path(&hooks)?;
        }
        let owner = self.httpd_user();

        let mut post_commit = vec![self.script_command("post-commit.py", "\"$1\" \"$2\"", system_id)];
        if let Some(branding) = &self.base.config().repository.branding_repo {
            if repo.starts_with(branding) {
                post_commit.push(self.script_command(
                    "data-checkout.py",
                    "\"$1\" \"$2\"",
                    system_id,
                ));
            }
        }
        executor.install_hook_script(
            &hooks,
            HookEvent::PostCommit,
            &self.hook_block(&post_commit),
            owner,
        )?;

        let pre_commit = hooks.join(HookEvent::PreCommit.script_name());
        if self.wandisco {
            // Replication runs the pre-commit checks elsewhere; retire ours.
            if executor.path_exists(&pre_commit) {
                executor.merge_trigger(&pre_commit, &pre_commit, &TriggerBlock::new())?;
            }
        } else {
            let command = self.script_command("pre-commit.py", "\"$1\" \"$2\"", system_id);
            executor.install_hook_script(
                &hooks,
                HookEvent::PreCommit,
                &self.hook_block(&[command]),
                owner,
            )?;
        }

        let command = self.script_command(
            "pre-revprop-change.py",
            "\"$1\" \"$2\" \"$3\" \"$4\" \"$5\"",
            system_id,
        );
        executor.install_hook_script(
            &hooks,
            HookEvent::PreRevpropChange,
            &self.hook_block(&[command]),
            owner,
        )?;

        info!(repo = %repo.display(), system_id, "Installed Subversion hooks");
        Ok(())
    }

    fn check_version(&self) -> Result<()> {
        let output = self.base.executor().run_checked(
            &ShellCommand::new(self.base.config().executables.svn.as_str()).arg("--version"),
        )?;
        let minimum = ToolVersion::new(&[1, 2, 1]);
        match parse_svn_version(&output.stdout) {
            None => Err(IntegrationError::unsupported("No svn version found")),
            Some(version) if !version.at_least(&minimum) => Err(IntegrationError::unsupported(
                format!("VERSION (requires {} or better): {}", minimum, version),
            )),
            Some(version) => {
                debug!(%version, "Subversion version accepted");
                Ok(())
            }
        }
    }
}

impl Adapter for SubversionAdapter {
    fn kind(&self) -> AdapterKind {
        if self.wandisco {
            AdapterKind::WandiscoSubversion
        } else {
            AdapterKind::Subversion
        }
    }

    fn base(&self) -> &RepositoryBase {
        &self.base
    }

    fn initialize_external_system(&self, system_id: &str) -> Result<()> {
        self.base.check_platform(self.kind())?;
        self.base.bind_external_system(system_id)
    }

    fn delete_external_system(&self, _system_id: &str) -> Result<()> {
        self.base.unbind_external_system()
    }

    fn verify_external_system(&self, adapter_type: &str) -> Result<()> {
        if adapter_type != self.expected_type() {
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
        _group: &str,
        dir: &str,
        system_id: &str,
        base_url: &str,
    ) -> Result<String> {
        let executor = self.base.executor();
        let path = self.base.resolve_repository_dir(dir);
        if executor.path_exists(&path) {
            return Err(IntegrationError::already_exists(dir));
        }
        if self.wandisco {
            url::Url::parse(base_url).map_err(|e| {
                IntegrationError::invalid_path(format!("Invalid base URL {}: {}", base_url, e))
            })?;
        }

        if let Err(e) = self.provision(&path, system_id) {
            warn!(dir = %path.display(), error = %e, "Repository creation failed, rolling back");
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

        info!(dir = %path.display(), "Created Subversion repository");
        Ok(self.base.report_path(&path))
    }

    fn setup_repository(&self, system_id: &str, _group: &str, dir: &str) -> Result<()> {
        let path = self.base.resolve_repository_dir(dir);
        self.install_hooks(system_id, &path)
    }

    fn set_repository_access_level(
        &self,
        _dir: &str,
        _repository_id: &str,
        _level: AccessLevel,
    ) -> Result<()> {
        Ok(())
    }

    fn verify_path(
        &self,
        _project_id: &str,
        _repository_id: &str,
        repository_path: &str,
        relative_path: &str,
    ) -> Result<()> {
        let repo = self.base.resolve_repository_dir(repository_path);
        let command = ShellCommand::new(self.base.config().executables.svnlook.as_str())
            .arg("tree")
            .path_arg(&repo)
            .arg(relative_path)
            .run_as(self.httpd_user());
        let result = self.base.executor().run(&command)?;
        if result.success() {
            Ok(())
        } else {
            debug!(repo = %repo.display(), relative_path, output = %result.output_summary(), "svnlook rejected path");
            Err(IntegrationError::invalid_path(INVALID_PATH))
        }
    }

    fn checkout_repository(
        &self,
        repository_path: &str,
        relative_path: &str,
        dest_dir: &Path,
    ) -> Result<()> {
        let executor = self.base.executor();
        let root = self.base.resolve_repository_dir(repository_path);
        let source = root.join(relative_path.trim_start_matches('/'));
        executor.set_user_on_path(self.httpd_user(), dest_dir)?;
        let command = ShellCommand::new(self.base.config().executables.svn.as_str())
            .arg("checkout")
            .arg(format!("file://{}", source.display()))
            .run_as(self.httpd_user())
            .current_dir(dest_dir);
        executor.run_checked(&command)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;
    use super::*;
    use crate::executor::mock::{Recorded, ScriptedOutput};
    use scm_common::errors::ErrorKind;
    use std::fs;

    fn repo_dir(fixture: &Fixture) -> String {
        fixture.root().join("proj1").display().to_string()
    }

    fn hook(fixture: &Fixture, name: &str) -> String {
        fs::read_to_string(fixture.root().join("proj1/hooks").join(name)).unwrap()
    }

    #[test]
    fn test_create_runs_svnadmin_and_installs_hooks() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        let adapter = fixture.adapter();
        let reported = adapter
            .create_repository("proj1", &repo_dir(&fixture), "sys1", "")
            .unwrap();
        assert_eq!(reported, repo_dir(&fixture));

        let lines = fixture.executor.command_lines();
        assert!(lines[0].starts_with("svnadmin create "));
        assert!(lines[0].contains("--fs-type=fsfs"));

        let post_commit = hook(&fixture, "post-commit");
        assert!(post_commit.starts_with("#!/bin/sh\n"));
        assert!(post_commit.contains("export SOURCEFORGE_PROPERTIES_PATH=\""));
        assert!(post_commit.contains("/post-commit.py\" \"$1\" \"$2\" sys1"));
        assert!(!post_commit.contains("data-checkout.py"));

        assert!(hook(&fixture, "pre-commit").contains("/pre-commit.py\" \"$1\" \"$2\" sys1"));
        assert!(hook(&fixture, "pre-revprop-change")
            .contains("\"$1\" \"$2\" \"$3\" \"$4\" \"$5\" sys1"));

        let hook_owners: Vec<_> = fixture
            .executor
            .operations()
            .into_iter()
            .filter_map(|op| match op {
                Recorded::SetUser { user, path } if path.parent().is_some_and(|p| p.ends_with("hooks")) => {
                    Some(user)
                }
                _ => None,
            })
            .collect();
        assert_eq!(hook_owners, vec!["apache"; 3]);
    }

    #[test]
    fn test_setup_is_idempotent_and_keeps_user_lines() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        let adapter = fixture.adapter();
        let dir = repo_dir(&fixture);
        adapter.create_repository("proj1", &dir, "sys1", "").unwrap();

        let hooks = fixture.root().join("proj1/hooks");
        let mut text = hook(&fixture, "post-commit");
        text.push_str("/usr/local/bin/notify-team \"$2\"\n");
        fs::write(hooks.join("post-commit"), &text).unwrap();

        adapter.setup_repository("sys1", "proj1", &dir).unwrap();
        let once = hook(&fixture, "post-commit");
        adapter.setup_repository("sys1", "proj1", &dir).unwrap();
        assert_eq!(hook(&fixture, "post-commit"), once);
        assert_eq!(once, text);
        assert_eq!(once.matches("BEGIN SOURCEFORGE SECTION").count(), 1);
    }

    #[test]
    fn test_branding_repository_gets_data_checkout() {
        let mut fixture = Fixture::new(AdapterKind::Subversion);
        fixture.config.repository.branding_repo = Some(fixture.root());
        fixture
            .adapter()
            .create_repository("proj1", &repo_dir(&fixture), "sys1", "")
            .unwrap();
        assert!(hook(&fixture, "post-commit").contains("/data-checkout.py\" \"$1\" \"$2\" sys1"));
    }

    #[test]
    fn test_create_existing_path_fails() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        fs::create_dir_all(fixture.root().join("proj1")).unwrap();
        let err = fixture
            .adapter()
            .create_repository("proj1", &repo_dir(&fixture), "sys1", "")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectAlreadyExists);
        assert!(fixture.executor.operations().is_empty());
    }

    #[test]
    fn test_failed_svnadmin_rolls_back() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        fixture
            .executor
            .on_command("svnadmin create", ScriptedOutput::failure(1, "svnadmin: E000013"));
        let err = fixture
            .adapter()
            .create_repository("proj1", &repo_dir(&fixture), "sys1", "")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrivilegedOperationFailure);
        assert!(err.message().contains("E000013"));
        assert!(!fixture.root().join("proj1").exists());
    }

    #[test]
    fn test_wandisco_requires_valid_base_url() {
        let fixture = Fixture::new(AdapterKind::WandiscoSubversion);
        let adapter = fixture.adapter();
        let err = adapter
            .create_repository("proj1", &repo_dir(&fixture), "sys1", "not a url")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);
        assert!(!fixture.root().join("proj1").exists());

        adapter
            .create_repository("proj1", &repo_dir(&fixture), "sys1", "https://svn.example.com/svn")
            .unwrap();
    }

    #[test]
    fn test_wandisco_hooks_are_guarded_and_pre_commit_retired() {
        let fixture = Fixture::new(AdapterKind::WandiscoSubversion);
        let hooks = fixture.root().join("proj1/hooks");
        fs::create_dir_all(&hooks).unwrap();
        fs::write(
            hooks.join("pre-commit"),
            "#!/bin/sh\n# BEGIN SOURCEFORGE SECTION - Do not remove these lines\nold\n# END SOURCEFORGE SECTION\nexit 0\n",
        )
        .unwrap();

        fixture
            .adapter()
            .setup_repository("sys1", "proj1", &repo_dir(&fixture))
            .unwrap();

        assert_eq!(hook(&fixture, "pre-commit"), "#!/bin/sh\nexit 0\n");
        let post_commit = hook(&fixture, "post-commit");
        assert!(post_commit.contains("if [ -f \""));
        assert!(post_commit.contains("  python \""));
        assert!(post_commit.contains("\nfi\ntrue\n"));
    }

    #[test]
    fn test_windows_virtual_path_round_trip() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        let adapter = super::super::build_adapter(fixture.context(true));
        adapter.initialize_external_system("sys1").unwrap();
        let reported = adapter
            .create_repository("proj1", "/windows-scmroot/proj1", "sys1", "")
            .unwrap();
        assert_eq!(reported, "/windows-scmroot/proj1");
        assert!(fixture.root().join("proj1/hooks/post-commit").exists());
    }

    #[test]
    fn test_verify_external_system() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        fixture
            .executor
            .on_command("--version", ScriptedOutput::ok("svn, version 1.14.2 (r1899510)"));
        let adapter = fixture.adapter();
        adapter.verify_external_system("Subversion").unwrap();
        assert!(adapter.verify_external_system("CVS").is_err());
        assert!(adapter.verify_external_system("WANdiscoSubversion").is_err());

        fixture
            .executor
            .on_command("--version", ScriptedOutput::ok("svn, version 1.2.0 (r14790)"));
        let err = adapter.verify_external_system("Subversion").unwrap_err();
        assert_eq!(err.message(), "VERSION (requires 1.2.1 or better): 1.2.0");
    }

    #[test]
    fn test_verify_path_uses_svnlook() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        let adapter = fixture.adapter();
        let dir = repo_dir(&fixture);
        adapter.verify_path("p", "r", &dir, "trunk").unwrap();

        fixture
            .executor
            .on_command("svnlook tree", ScriptedOutput::failure(1, "path not found"));
        let err = adapter.verify_path("p", "r", &dir, "nope").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPath);

        let command = fixture.executor.commands().pop().unwrap();
        assert_eq!(command.user(), Some("apache"));
    }

    #[test]
    fn test_checkout_hands_destination_to_httpd() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        let dest = fixture.dir.path().join("work");
        fixture
            .adapter()
            .checkout_repository(&repo_dir(&fixture), "/trunk", &dest)
            .unwrap();

        assert!(fixture.executor.operations().contains(&Recorded::SetUser {
            user: "apache".into(),
            path: dest.clone(),
        }));
        let command = fixture.executor.commands().pop().unwrap();
        let expected = format!("file://{}/proj1/trunk", fixture.root().display());
        assert!(command.to_shell_string().contains(&expected));
        assert_eq!(command.working_dir(), Some(dest.as_path()));
    }

    #[test]
    fn test_marker_lifecycle() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        let adapter = fixture.adapter();
        adapter.initialize_external_system("sys1").unwrap();
        let err = adapter.initialize_external_system("sys2").unwrap_err();
        assert_eq!(
            err.message(),
            "Unable to initialize external system. Another integration already exists."
        );
        adapter.delete_external_system("sys1").unwrap();
        adapter.initialize_external_system("sys2").unwrap();
    }

    #[test]
    fn test_access_level_is_noop() {
        let fixture = Fixture::new(AdapterKind::Subversion);
        fixture
            .adapter()
            .set_repository_access_level(&repo_dir(&fixture), "proj1", AccessLevel::All)
            .unwrap();
        assert!(fixture.executor.operations().is_empty());
    }
}
