//! Privileged executor backed by the local Unix toolset.
//!
//! User and group changes go through `useradd`/`groupadd`/`gpasswd`,
//! ownership and modes through `chown`/`chgrp`/`chmod`. Commands that must
//! run as another account are wrapped in `su -s /bin/sh -c`.

use scm_common::errors::{ErrorCode, IntegrationError, Result};
use scm_common::executor::{CommandResult, PrivilegedExecutor, ProcessHandle, ShellCommand};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, warn};
use uuid::Uuid;

/// Executes privileged operations on the local host.
#[derive(Debug, Clone)]
pub struct UnixExecutor {
    temp_root: PathBuf,
}

impl UnixExecutor {
    pub fn new() -> Self {
        Self {
            temp_root: std::env::temp_dir(),
        }
    }

    #[cfg(test)]
    fn with_temp_root(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
        }
    }

    fn build(&self, command: &ShellCommand) -> Command {
        match command.user() {
            Some(user) => {
                let mut cmd = Command::new("su");
                cmd.args(["-s", "/bin/sh", "-c"])
                    .arg(command.to_shell_script())
                    .arg(user);
                cmd
            }
            None => {
                let mut cmd = Command::new(command.program());
                cmd.args(command.arguments());
                if let Some(dir) = command.working_dir() {
                    cmd.current_dir(dir);
                }
                for (key, value) in command.env_vars() {
                    cmd.env(key, value);
                }
                cmd
            }
        }
    }

    /// Run a system tool and fail on non-zero exit.
    fn tool(&self, program: &str, args: &[&str]) -> Result<CommandResult> {
        self.run_checked(&ShellCommand::new(program).args(args.iter().copied()))
    }
}

impl Default for UnixExecutor {
    fn default() -> Self {
        Self::new()
    }
}

fn spawn_error(command: &ShellCommand, err: std::io::Error) -> IntegrationError {
    IntegrationError::privileged(format!("Failed to start {}: {}", command, err))
        .with_code(ErrorCode::ExecSpawnFailed)
        .with_source(err)
}

fn fs_error(action: &str, path: &Path, err: std::io::Error) -> IntegrationError {
    IntegrationError::io(action, path, err).with_code(ErrorCode::ExecFilesystemError)
}

/// Members listed in the fourth field of a `getent group` line.
fn parse_group_members(line: &str) -> Vec<String> {
    line.trim()
        .splitn(4, ':')
        .nth(3)
        .map(|members| {
            members
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

impl PrivilegedExecutor for UnixExecutor {
    fn user_exists(&self, user: &str) -> Result<bool> {
        Ok(self.run(&ShellCommand::new("id").args(["-u", user]))?.success())
    }

    fn create_user(&self, user: &str) -> Result<()> {
        self.tool("useradd", &["-M", "-s", "/sbin/nologin", user])?;
        debug!(user, "Created user");
        Ok(())
    }

    fn group_exists(&self, group: &str) -> Result<bool> {
        Ok(self
            .run(&ShellCommand::new("getent").args(["group", group]))?
            .success())
    }

    fn create_group(&self, group: &str) -> Result<()> {
        if self.group_exists(group)? {
            return Err(IntegrationError::already_exists(group));
        }
        self.tool("groupadd", &[group])?;
        debug!(group, "Created group");
        Ok(())
    }

    fn delete_group(&self, group: &str) -> Result<()> {
        self.tool("groupdel", &[group])?;
        debug!(group, "Deleted group");
        Ok(())
    }

    fn add_users_to_group(&self, group: &str, users: &[String]) -> Result<()> {
        for user in users {
            self.tool("gpasswd", &["-a", user, group])?;
        }
        Ok(())
    }

    fn remove_users_from_group(&self, group: &str, users: &[String]) -> Result<()> {
        for user in users {
            self.tool("gpasswd", &["-d", user, group])?;
        }
        Ok(())
    }

    fn list_users_in_group(&self, group: &str) -> Result<Vec<String>> {
        let result = self.tool("getent", &["group", group])?;
        Ok(parse_group_members(&result.stdout))
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_path(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| fs_error("create", path, e))
    }

    fn delete_path(&self, path: &Path) -> Result<()> {
        let outcome = match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
            Ok(_) => fs::remove_file(path),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => Err(e),
        };
        outcome.map_err(|e| fs_error("delete", path, e))
    }

    fn create_file(&self, path: &Path, content: &str) -> Result<()> {
        fs::write(path, content).map_err(|e| fs_error("write", path, e))
    }

    fn create_temp_directory(&self) -> Result<PathBuf> {
        let dir = self.temp_root.join(format!("scmd-{}", Uuid::new_v4()));
        self.create_path(&dir)?;
        Ok(dir)
    }

    fn set_user_on_path(&self, user: &str, path: &Path) -> Result<()> {
        self.run_checked(&ShellCommand::new("chown").args(["-R", user]).path_arg(path))?;
        Ok(())
    }

    fn set_group_on_path(&self, group: &str, path: &Path) -> Result<()> {
        self.run_checked(&ShellCommand::new("chgrp").args(["-R", group]).path_arg(path))?;
        Ok(())
    }

    fn file_group(&self, path: &Path) -> Result<String> {
        let result = self.run_checked(&ShellCommand::new("stat").args(["-c", "%G"]).path_arg(path))?;
        Ok(result.stdout.trim().to_string())
    }

    fn set_permissions(&self, path: &Path, mode: &str, recursive: bool) -> Result<()> {
        let mut cmd = ShellCommand::new("chmod");
        if recursive {
            cmd = cmd.arg("-R");
        }
        self.run_checked(&cmd.arg(mode).path_arg(path))?;
        Ok(())
    }

    fn run(&self, command: &ShellCommand) -> Result<CommandResult> {
        debug!(command = %command, user = ?command.user(), "Running command");
        let output = self
            .build(command)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(command, e))?;

        let result = CommandResult {
            command: command.display_masked(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        };
        if !result.success() {
            debug!(
                command = %result.command,
                exit_code = result.exit_code,
                "Command exited non-zero"
            );
        }
        Ok(result)
    }

    fn spawn(&self, command: &ShellCommand) -> Result<Box<dyn ProcessHandle>> {
        debug!(command = %command, "Spawning background command");
        let child = self
            .build(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| spawn_error(command, e))?;
        Ok(Box::new(ChildHandle {
            child,
            command: command.display_masked(),
        }))
    }
}

/// [`ProcessHandle`] over a spawned child process.
struct ChildHandle {
    child: Child,
    command: String,
}

impl ProcessHandle for ChildHandle {
    fn try_wait(&mut self) -> Result<Option<i32>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Ok(Some(status.code().unwrap_or(-1))),
            Ok(None) => Ok(None),
            Err(e) => Err(IntegrationError::privileged(format!(
                "Failed to poll {}: {}",
                self.command, e
            ))
            .with_source(e)),
        }
    }

    fn kill(&mut self) -> Result<()> {
        if let Err(e) = self.child.kill() {
            // Already exited; nothing left to terminate.
            if e.kind() != ErrorKind::InvalidInput {
                warn!(command = %self.command, error = %e, "Failed to kill process");
                return Err(IntegrationError::privileged(format!(
                    "Failed to kill {}: {}",
                    self.command, e
                ))
                .with_source(e));
            }
        }
        let _ = self.child.wait();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    #[test]
    fn test_parse_group_members() {
        assert_eq!(
            parse_group_members("proj1:x:1001:alice,bob\n"),
            vec!["alice".to_string(), "bob".to_string()]
        );
        assert!(parse_group_members("proj1:x:1001:\n").is_empty());
        assert!(parse_group_members("garbage").is_empty());
    }

    #[test]
    fn test_run_captures_output_and_exit_code() {
        let executor = UnixExecutor::new();
        let ok = executor
            .run(&ShellCommand::new("sh").args(["-c", "echo out; echo err >&2"]))
            .unwrap();
        assert!(ok.success());
        assert_eq!(ok.stdout.trim(), "out");
        assert_eq!(ok.stderr.trim(), "err");

        let failed = executor
            .run(&ShellCommand::new("sh").args(["-c", "exit 3"]))
            .unwrap();
        assert_eq!(failed.exit_code, 3);
        assert!(executor.run_checked(&ShellCommand::new("false")).is_err());
    }

    #[test]
    fn test_run_uses_working_dir_and_env() {
        let dir = TempDir::new().unwrap();
        let executor = UnixExecutor::new();
        let result = executor
            .run(
                &ShellCommand::new("sh")
                    .args(["-c", "pwd; echo $SCMD_PROBE"])
                    .current_dir(dir.path())
                    .env("SCMD_PROBE", "probe-value"),
            )
            .unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(result.stdout.contains(&*canonical.to_string_lossy()));
        assert!(result.stdout.contains("probe-value"));
    }

    #[test]
    fn test_missing_program_is_spawn_failure() {
        let err = UnixExecutor::new()
            .run(&ShellCommand::new("/nonexistent/scmd-tool"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecSpawnFailed);
    }

    #[test]
    fn test_path_operations() {
        let dir = TempDir::new().unwrap();
        let executor = UnixExecutor::with_temp_root(dir.path());

        let nested = dir.path().join("a/b/c");
        executor.create_path(&nested).unwrap();
        assert!(executor.path_exists(&nested));

        let file = nested.join("f.txt");
        executor.create_file(&file, "hello").unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "hello");

        executor.delete_path(&dir.path().join("a")).unwrap();
        assert!(!executor.path_exists(&nested));
        executor.delete_path(&dir.path().join("a")).unwrap();

        let temp = executor.create_temp_directory().unwrap();
        assert!(temp.starts_with(dir.path()));
        assert!(temp.is_dir());
    }

    #[test]
    fn test_set_permissions_on_own_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let file = dir.path().join("hook");
        fs::write(&file, "#!/bin/sh\n").unwrap();

        let executor = UnixExecutor::new();
        executor.set_permissions(&file, "u=rwx,go=", false).unwrap();
        let mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);

        assert!(!executor.file_group(&file).unwrap().is_empty());
    }

    #[test]
    fn test_current_user_exists() {
        let user = whoami::username().unwrap();
        assert!(UnixExecutor::new().user_exists(&user).unwrap());
        assert!(
            !UnixExecutor::new()
                .user_exists("scmd-no-such-user-4711")
                .unwrap()
        );
    }

    #[test]
    fn test_spawn_poll_and_kill() {
        let executor = UnixExecutor::new();

        let mut quick = executor.spawn(&ShellCommand::new("true")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let code = loop {
            if let Some(code) = quick.try_wait().unwrap() {
                break code;
            }
            assert!(Instant::now() < deadline, "true never exited");
            std::thread::sleep(Duration::from_millis(10));
        };
        assert_eq!(code, 0);

        let mut slow = executor
            .spawn(&ShellCommand::new("sleep").arg("30"))
            .unwrap();
        assert_eq!(slow.try_wait().unwrap(), None);
        slow.kill().unwrap();
        assert!(slow.try_wait().unwrap().is_some());
    }
}
