//! Contract for privileged local operations.
//!
//! Adapters never touch users, groups, ownership or external tools directly;
//! they go through a [`PrivilegedExecutor`]. The daemon ships a Unix
//! implementation, and tests substitute a recording double.

use crate::errors::{ErrorCode, IntegrationError, Result};
use crate::trigger::{self, HookEvent, TriggerBlock};
use crate::types::GroupStatus;
use crate::util::mask_sensitive_command;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Symbolic `chmod` modes used across adapters.
pub mod modes {
    /// Owner and group full access, others none.
    pub const REPOSITORY: &str = "ug=rwx,o=";
    /// Owner-only access while a repository is locked.
    pub const LOCKED: &str = "u=rwx,go=";
    /// Strip group and other permissions.
    pub const OWNER_ONLY: &str = "go-rwx";
    /// Directory readable by everyone, writable by owner.
    pub const SHARED_DIR: &str = "u=rwx,go=rx";
    /// Hook script runnable only by its owner.
    pub const HOOK_SCRIPT: &str = "u=rwx,go=";
    pub const GROUP_READ_WRITE: &str = "ug=rw,o=";
    pub const GROUP_READ: &str = "ug=r,o=";
}

/// A command line plus the identity and directory to run it with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShellCommand {
    program: String,
    args: Vec<String>,
    run_as: Option<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run as `user` instead of the daemon's own identity.
    pub fn run_as(mut self, user: impl Into<String>) -> Self {
        self.run_as = Some(user.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn user(&self) -> Option<&str> {
        self.run_as.as_deref()
    }

    pub fn working_dir(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn env_vars(&self) -> &[(String, String)] {
        &self.env
    }

    /// Shell-quoted command line, suitable for `sh -c`.
    pub fn to_shell_string(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| quote(part))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Script for `sh -c`: optional `cd`, optional `env` assignments, then
    /// the command line.
    pub fn to_shell_script(&self) -> String {
        let mut script = String::new();
        if let Some(dir) = &self.cwd {
            script.push_str("cd ");
            script.push_str(&quote(&dir.to_string_lossy()));
            script.push_str(" && ");
        }
        if !self.env.is_empty() {
            script.push_str("env ");
            for (key, value) in &self.env {
                script.push_str(&quote(&format!("{}={}", key, value)));
                script.push(' ');
            }
        }
        script.push_str(&self.to_shell_string());
        script
    }

    /// Command line with secrets masked, for logs and error messages.
    pub fn display_masked(&self) -> String {
        mask_sensitive_command(&self.to_shell_string())
    }
}

fn quote(part: &str) -> String {
    shell_escape::escape(part.into()).into_owned()
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_masked())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Masked command line.
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// `Stderr: "..." Stdout: "..."`, as attached to failures.
    pub fn output_summary(&self) -> String {
        format!("Stderr: \"{}\" Stdout: \"{}\"", self.stderr, self.stdout)
    }

    /// Convert a non-zero exit into a privileged operation failure.
    pub fn into_checked(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(IntegrationError::privileged(format!(
                "Command failed (exit {}): {} {}",
                self.exit_code,
                self.command,
                self.output_summary()
            ))
            .with_code(ErrorCode::ExecCommandFailed))
        }
    }
}

/// Handle to a command started with [`PrivilegedExecutor::spawn`].
pub trait ProcessHandle: Send {
    /// Exit code if the process has finished, `None` while it runs.
    fn try_wait(&mut self) -> Result<Option<i32>>;

    /// Forcibly terminate the process and reap it.
    fn kill(&mut self) -> Result<()>;
}

/// Privileged operations consumed by adapters and analysis jobs.
pub trait PrivilegedExecutor: Send + Sync {
    // ── Users and groups ──

    fn user_exists(&self, user: &str) -> Result<bool>;

    fn create_user(&self, user: &str) -> Result<()>;

    /// Create any of `users` that do not exist yet, returning the new ones.
    fn create_users_if_missing(&self, users: &[String]) -> Result<Vec<String>> {
        let mut created = Vec::new();
        for user in users {
            if !self.user_exists(user)? {
                self.create_user(user)?;
                created.push(user.clone());
            }
        }
        Ok(created)
    }

    fn group_exists(&self, group: &str) -> Result<bool>;

    /// Create `group`; fails with `ObjectAlreadyExists` if it exists.
    fn create_group(&self, group: &str) -> Result<()>;

    fn delete_group(&self, group: &str) -> Result<()>;

    /// Create `group` unless present, reporting which happened.
    fn ensure_group_exists(&self, group: &str) -> Result<GroupStatus> {
        if self.group_exists(group)? {
            return Ok(GroupStatus::AlreadyPresent);
        }
        self.create_group(group)?;
        Ok(GroupStatus::Created)
    }

    fn add_users_to_group(&self, group: &str, users: &[String]) -> Result<()>;

    fn remove_users_from_group(&self, group: &str, users: &[String]) -> Result<()>;

    fn list_users_in_group(&self, group: &str) -> Result<Vec<String>>;

    // ── Paths and ownership ──

    fn path_exists(&self, path: &Path) -> bool;

    /// Create `path` and any missing parents.
    fn create_path(&self, path: &Path) -> Result<()>;

    /// Remove `path` recursively; missing paths are not an error.
    fn delete_path(&self, path: &Path) -> Result<()>;

    fn create_file(&self, path: &Path, content: &str) -> Result<()>;

    fn create_temp_directory(&self) -> Result<PathBuf>;

    /// `chown -R user path`.
    fn set_user_on_path(&self, user: &str, path: &Path) -> Result<()>;

    /// `chgrp -R group path`.
    fn set_group_on_path(&self, group: &str, path: &Path) -> Result<()>;

    fn file_group(&self, path: &Path) -> Result<String>;

    /// Apply a symbolic `chmod` mode (see [`modes`]).
    fn set_permissions(&self, path: &Path, mode: &str, recursive: bool) -> Result<()>;

    // ── Commands ──

    /// Run to completion; non-zero exit is returned, not raised.
    fn run(&self, command: &ShellCommand) -> Result<CommandResult>;

    /// Run to completion and fail on non-zero exit.
    fn run_checked(&self, command: &ShellCommand) -> Result<CommandResult> {
        self.run(command)?.into_checked()
    }

    /// Start in the background.
    fn spawn(&self, command: &ShellCommand) -> Result<Box<dyn ProcessHandle>>;

    // ── Triggers ──

    /// Merge `block` from `source` into `dest` (see [`trigger::merge_file`]).
    fn merge_trigger(&self, source: &Path, dest: &Path, block: &TriggerBlock) -> Result<()> {
        trigger::merge_file(source, dest, block)
    }

    /// Install or update the managed block of a hook script, then hand it
    /// to `owner` with owner-only access. A new script gets an interpreter
    /// line ahead of the block.
    fn install_hook_script(
        &self,
        hooks_dir: &Path,
        event: HookEvent,
        block: &TriggerBlock,
        owner: &str,
    ) -> Result<PathBuf> {
        let script = hooks_dir.join(event.script_name());
        if self.path_exists(&script) {
            self.merge_trigger(&script, &script, block)?;
        } else {
            self.create_file(&script, &format!("#!/bin/sh\n\n{}", block.render()))?;
        }
        self.set_user_on_path(owner, &script)?;
        self.set_permissions(&script, modes::HOOK_SCRIPT, false)?;
        Ok(script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_string_quotes_arguments() {
        let cmd = ShellCommand::new("cvs")
            .arg("-d")
            .arg("/scm/my repo")
            .arg("init");
        assert_eq!(cmd.to_shell_string(), "cvs -d '/scm/my repo' init");
    }

    #[test]
    fn test_shell_script_includes_dir_and_env() {
        let cmd = ShellCommand::new("cvs")
            .args(["commit", "-f"])
            .current_dir("/tmp/co 1")
            .env("CVSROOT", "/scm/p1");
        let script = cmd.to_shell_script();
        assert!(script.starts_with("cd '/tmp/co 1' && env "), "{}", script);
        assert!(script.contains("CVSROOT"));
        assert!(script.ends_with(" cvs commit -f"), "{}", script);
        assert_eq!(ShellCommand::new("true").to_shell_script(), "true");
    }

    #[test]
    fn test_display_masks_password() {
        let cmd = ShellCommand::new("bdstool")
            .args(["--user", "alice", "--password", "hunter2", "login"]);
        let shown = cmd.to_string();
        assert!(!shown.contains("hunter2"), "leaked: {}", shown);
        assert!(shown.contains("--password ***"));
    }

    #[test]
    fn test_into_checked() {
        let ok = CommandResult {
            command: "true".into(),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
        };
        assert!(ok.into_checked().is_ok());

        let failed = CommandResult {
            command: "false".into(),
            stdout: "out".into(),
            stderr: "err".into(),
            exit_code: 1,
        };
        let err = failed.into_checked().unwrap_err();
        assert!(err.message().contains("Stderr: \"err\" Stdout: \"out\""));
        assert_eq!(err.code(), ErrorCode::ExecCommandFailed);
    }
}
