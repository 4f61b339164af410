//! Recording test double for [`PrivilegedExecutor`].
//!
//! Paths live on the real filesystem (tests point the daemon at a
//! `TempDir`), while users, groups, ownership and external commands are
//! simulated and recorded so tests can assert on exactly what was asked.

use scm_common::errors::{IntegrationError, Result};
use scm_common::executor::{CommandResult, PrivilegedExecutor, ProcessHandle, ShellCommand};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use uuid::Uuid;

/// One operation observed by the [`RecordingExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    CreateUser(String),
    CreateGroup(String),
    DeleteGroup(String),
    AddUsers { group: String, users: Vec<String> },
    RemoveUsers { group: String, users: Vec<String> },
    SetUser { user: String, path: PathBuf },
    SetGroup { group: String, path: PathBuf },
    SetPermissions { path: PathBuf, mode: String, recursive: bool },
    Run(ShellCommand),
    Spawn(ShellCommand),
    Kill(String),
}

/// Canned reply for commands matching a pattern.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Directory created when the command runs; relative paths resolve
    /// against the command's working directory.
    pub creates: Option<PathBuf>,
    /// How long the command blocks before returning.
    pub delay: Option<Duration>,
}

impl ScriptedOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn creating(mut self, dir: impl Into<PathBuf>) -> Self {
        self.creates = Some(dir.into());
        self
    }

    pub fn taking(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// How a spawned process behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedProcess {
    /// Exits with the code after being polled this many times.
    ExitsAfter { polls: usize, exit_code: i32 },
    /// Runs until killed.
    RunsUntilKilled,
}

#[derive(Default)]
struct State {
    users: HashSet<String>,
    groups: BTreeMap<String, BTreeSet<String>>,
    path_groups: HashMap<PathBuf, String>,
    ops: Vec<Recorded>,
    responses: Vec<(String, ScriptedOutput)>,
    processes: Vec<(String, ScriptedProcess)>,
    failing: HashSet<&'static str>,
}

/// Executor double that records every privileged operation.
#[derive(Clone)]
pub struct RecordingExecutor {
    state: Arc<Mutex<State>>,
    temp_root: PathBuf,
}

impl RecordingExecutor {
    /// Temporary directories are created under `temp_root`.
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            temp_root: temp_root.into(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reply with `output` to any command whose shell string contains
    /// `pattern`. Later registrations take precedence.
    pub fn on_command(&self, pattern: impl Into<String>, output: ScriptedOutput) -> &Self {
        self.state().responses.push((pattern.into(), output));
        self
    }

    /// Spawned commands containing `pattern` behave as `process`.
    pub fn on_spawn(&self, pattern: impl Into<String>, process: ScriptedProcess) -> &Self {
        self.state().processes.push((pattern.into(), process));
        self
    }

    /// Make the named trait operation (e.g. `"set_permissions"`) fail.
    pub fn fail_operation(&self, operation: &'static str) -> &Self {
        self.state().failing.insert(operation);
        self
    }

    pub fn add_existing_user(&self, user: &str) -> &Self {
        self.state().users.insert(user.to_string());
        self
    }

    pub fn add_existing_group(&self, group: &str, members: &[&str]) -> &Self {
        self.state().groups.insert(
            group.to_string(),
            members.iter().map(|m| m.to_string()).collect(),
        );
        self
    }

    pub fn operations(&self) -> Vec<Recorded> {
        self.state().ops.clone()
    }

    /// Every command passed to `run`, in order.
    pub fn commands(&self) -> Vec<ShellCommand> {
        self.state()
            .ops
            .iter()
            .filter_map(|op| match op {
                Recorded::Run(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// Shell strings of every command run, for substring assertions.
    pub fn command_lines(&self) -> Vec<String> {
        self.commands()
            .iter()
            .map(ShellCommand::to_shell_string)
            .collect()
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.state().groups.contains_key(group)
    }

    pub fn has_user(&self, user: &str) -> bool {
        self.state().users.contains(user)
    }

    pub fn members(&self, group: &str) -> Vec<String> {
        self.state()
            .groups
            .get(group)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        if self.state().failing.contains(operation) {
            return Err(IntegrationError::privileged(format!(
                "{} failed (scripted)",
                operation
            )));
        }
        Ok(())
    }

    fn record(&self, op: Recorded) {
        self.state().ops.push(op);
    }
}

impl PrivilegedExecutor for RecordingExecutor {
    fn user_exists(&self, user: &str) -> Result<bool> {
        Ok(self.state().users.contains(user))
    }

    fn create_user(&self, user: &str) -> Result<()> {
        self.check("create_user")?;
        let mut state = self.state();
        state.users.insert(user.to_string());
        state.ops.push(Recorded::CreateUser(user.to_string()));
        Ok(())
    }

    fn group_exists(&self, group: &str) -> Result<bool> {
        Ok(self.state().groups.contains_key(group))
    }

    fn create_group(&self, group: &str) -> Result<()> {
        self.check("create_group")?;
        let mut state = self.state();
        if state.groups.contains_key(group) {
            return Err(IntegrationError::already_exists(group));
        }
        state.groups.insert(group.to_string(), BTreeSet::new());
        state.ops.push(Recorded::CreateGroup(group.to_string()));
        Ok(())
    }

    fn delete_group(&self, group: &str) -> Result<()> {
        self.check("delete_group")?;
        let mut state = self.state();
        state.groups.remove(group);
        state.ops.push(Recorded::DeleteGroup(group.to_string()));
        Ok(())
    }

    fn add_users_to_group(&self, group: &str, users: &[String]) -> Result<()> {
        self.check("add_users_to_group")?;
        let mut state = self.state();
        let members = state
            .groups
            .get_mut(group)
            .ok_or_else(|| IntegrationError::privileged(format!("no such group {}", group)))?;
        members.extend(users.iter().cloned());
        state.ops.push(Recorded::AddUsers {
            group: group.to_string(),
            users: users.to_vec(),
        });
        Ok(())
    }

    fn remove_users_from_group(&self, group: &str, users: &[String]) -> Result<()> {
        self.check("remove_users_from_group")?;
        let mut state = self.state();
        if let Some(members) = state.groups.get_mut(group) {
            for user in users {
                members.remove(user);
            }
        }
        state.ops.push(Recorded::RemoveUsers {
            group: group.to_string(),
            users: users.to_vec(),
        });
        Ok(())
    }

    fn list_users_in_group(&self, group: &str) -> Result<Vec<String>> {
        self.check("list_users_in_group")?;
        self.state()
            .groups
            .get(group)
            .map(|m| m.iter().cloned().collect())
            .ok_or_else(|| IntegrationError::privileged(format!("no such group {}", group)))
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_path(&self, path: &Path) -> Result<()> {
        self.check("create_path")?;
        fs::create_dir_all(path).map_err(|e| IntegrationError::io("create", path, e))
    }

    fn delete_path(&self, path: &Path) -> Result<()> {
        self.check("delete_path")?;
        if path.is_dir() {
            fs::remove_dir_all(path).map_err(|e| IntegrationError::io("delete", path, e))
        } else if path.exists() {
            fs::remove_file(path).map_err(|e| IntegrationError::io("delete", path, e))
        } else {
            Ok(())
        }
    }

    fn create_file(&self, path: &Path, content: &str) -> Result<()> {
        self.check("create_file")?;
        fs::write(path, content).map_err(|e| IntegrationError::io("write", path, e))
    }

    fn create_temp_directory(&self) -> Result<PathBuf> {
        self.check("create_temp_directory")?;
        let dir = self.temp_root.join(format!("tmp-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir).map_err(|e| IntegrationError::io("create", &dir, e))?;
        Ok(dir)
    }

    fn set_user_on_path(&self, user: &str, path: &Path) -> Result<()> {
        self.check("set_user_on_path")?;
        self.record(Recorded::SetUser {
            user: user.to_string(),
            path: path.to_path_buf(),
        });
        Ok(())
    }

    fn set_group_on_path(&self, group: &str, path: &Path) -> Result<()> {
        self.check("set_group_on_path")?;
        let mut state = self.state();
        state
            .path_groups
            .insert(path.to_path_buf(), group.to_string());
        state.ops.push(Recorded::SetGroup {
            group: group.to_string(),
            path: path.to_path_buf(),
        });
        Ok(())
    }

    fn file_group(&self, path: &Path) -> Result<String> {
        self.check("file_group")?;
        if !path.exists() {
            return Err(IntegrationError::privileged(format!(
                "stat {}: no such file",
                path.display()
            )));
        }
        Ok(self
            .state()
            .path_groups
            .get(path)
            .cloned()
            .unwrap_or_else(|| "root".to_string()))
    }

    fn set_permissions(&self, path: &Path, mode: &str, recursive: bool) -> Result<()> {
        self.check("set_permissions")?;
        self.record(Recorded::SetPermissions {
            path: path.to_path_buf(),
            mode: mode.to_string(),
            recursive,
        });
        Ok(())
    }

    fn run(&self, command: &ShellCommand) -> Result<CommandResult> {
        self.check("run")?;
        let line = command.to_shell_string();
        let scripted = {
            let mut state = self.state();
            state.ops.push(Recorded::Run(command.clone()));
            state
                .responses
                .iter()
                .rev()
                .find(|(pattern, _)| line.contains(pattern.as_str()))
                .map(|(_, output)| output.clone())
                .unwrap_or_default()
        };

        if let Some(delay) = scripted.delay {
            thread::sleep(delay);
        }
        if let Some(dir) = &scripted.creates {
            let target = match command.working_dir() {
                Some(cwd) if dir.is_relative() => cwd.join(dir),
                _ => dir.clone(),
            };
            fs::create_dir_all(&target).map_err(|e| IntegrationError::io("create", &target, e))?;
        }

        Ok(CommandResult {
            command: command.display_masked(),
            stdout: scripted.stdout,
            stderr: scripted.stderr,
            exit_code: scripted.exit_code,
        })
    }

    fn spawn(&self, command: &ShellCommand) -> Result<Box<dyn ProcessHandle>> {
        self.check("spawn")?;
        let line = command.to_shell_string();
        let behaviour = {
            let mut state = self.state();
            state.ops.push(Recorded::Spawn(command.clone()));
            state
                .processes
                .iter()
                .rev()
                .find(|(pattern, _)| line.contains(pattern.as_str()))
                .map(|(_, process)| *process)
                .unwrap_or(ScriptedProcess::ExitsAfter {
                    polls: 0,
                    exit_code: 0,
                })
        };
        Ok(Box::new(MockProcess {
            behaviour,
            polls: 0,
            killed: false,
            command: command.display_masked(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockProcess {
    behaviour: ScriptedProcess,
    polls: usize,
    killed: bool,
    command: String,
    state: Arc<Mutex<State>>,
}

impl ProcessHandle for MockProcess {
    fn try_wait(&mut self) -> Result<Option<i32>> {
        if self.killed {
            return Ok(Some(-9));
        }
        match self.behaviour {
            ScriptedProcess::ExitsAfter { polls, exit_code } => {
                if self.polls >= polls {
                    Ok(Some(exit_code))
                } else {
                    self.polls += 1;
                    Ok(None)
                }
            }
            ScriptedProcess::RunsUntilKilled => Ok(None),
        }
    }

    fn kill(&mut self) -> Result<()> {
        self.killed = true;
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .ops
            .push(Recorded::Kill(self.command.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scm_common::types::GroupStatus;
    use tempfile::TempDir;

    #[test]
    fn test_groups_and_membership() {
        let dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::new(dir.path());

        assert_eq!(
            executor.ensure_group_exists("p1").unwrap(),
            GroupStatus::Created
        );
        assert_eq!(
            executor.ensure_group_exists("p1").unwrap(),
            GroupStatus::AlreadyPresent
        );

        executor
            .add_users_to_group("p1", &["alice".into(), "bob".into()])
            .unwrap();
        executor.remove_users_from_group("p1", &["bob".into()]).unwrap();
        assert_eq!(executor.members("p1"), vec!["alice".to_string()]);
        assert!(executor.list_users_in_group("missing").is_err());
    }

    #[test]
    fn test_scripted_commands() {
        let dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::new(dir.path());
        executor
            .on_command("cvs", ScriptedOutput::ok("generic"))
            .on_command("-version", ScriptedOutput::ok("Concurrent Versions System (CVS) 1.12.13"))
            .on_command("checkout", ScriptedOutput::ok("").creating("CVSROOT"));

        let version = executor
            .run(&ShellCommand::new("cvs").arg("-version"))
            .unwrap();
        assert!(version.stdout.contains("1.12.13"));

        let other = executor.run(&ShellCommand::new("cvs").arg("init")).unwrap();
        assert_eq!(other.stdout, "generic");

        executor
            .run(
                &ShellCommand::new("cvs")
                    .arg("checkout")
                    .current_dir(dir.path()),
            )
            .unwrap();
        assert!(dir.path().join("CVSROOT").is_dir());
        assert_eq!(executor.commands().len(), 3);
    }

    #[test]
    fn test_scripted_failure() {
        let dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::new(dir.path());
        executor.fail_operation("set_permissions");
        assert!(executor.set_permissions(dir.path(), "u=rwx", false).is_err());
        assert!(executor.set_user_on_path("nobody", dir.path()).is_ok());
    }

    #[test]
    fn test_spawned_process_runs_until_killed() {
        let dir = TempDir::new().unwrap();
        let executor = RecordingExecutor::new(dir.path());
        executor.on_spawn("analyze", ScriptedProcess::RunsUntilKilled);

        let mut process = executor
            .spawn(&ShellCommand::new("bdstool").arg("analyze"))
            .unwrap();
        assert_eq!(process.try_wait().unwrap(), None);
        process.kill().unwrap();
        assert!(process.try_wait().unwrap().is_some());
        assert!(
            executor
                .operations()
                .iter()
                .any(|op| matches!(op, Recorded::Kill(_)))
        );
    }
}
