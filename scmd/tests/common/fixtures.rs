use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

pub const SECRET: &str = "integration-test-secret";

/// A throwaway installation: home, repository root, socket and a config
/// file pointing at them.
pub struct TestInstall {
    pub dir: TempDir,
    pub config_path: PathBuf,
    pub socket_path: PathBuf,
}

impl TestInstall {
    pub fn new() -> Self {
        Self::with_secret(Some(SECRET))
    }

    pub fn with_secret(secret: Option<&str>) -> Self {
        crate::test_log!("FIXTURE: Creating test installation");

        let dir = TempDir::new().expect("Failed to create temp dir");
        let home = dir.path().join("home");
        let root = dir.path().join("scm");
        let socket_path = dir.path().join("run").join("scmd.sock");
        fs::create_dir_all(&home).expect("Failed to create home dir");
        fs::create_dir_all(&root).expect("Failed to create repository root");

        let secret_line = secret
            .map(|s| format!("shared_secret = \"{}\"\n", s))
            .unwrap_or_default();
        let config = format!(
            r#"[daemon]
socket_path = "{socket}"
adapter = "subversion"
home_dir = "{home}"
max_clock_skew_secs = 300
{secret_line}
[repository]
root = "{root}"

[logging]
level = "debug"
format = "text"
"#,
            socket = socket_path.display(),
            home = home.display(),
            root = root.display(),
        );
        let config_path = dir.path().join("scmd.toml");
        fs::write(&config_path, config).expect("Failed to write config");

        Self {
            dir,
            config_path,
            socket_path,
        }
    }

    /// `scmd --config <this install>` with `SCMD_*` overrides cleared.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_scmd"));
        for (key, _) in std::env::vars() {
            if key.starts_with("SCMD_") {
                cmd.env_remove(key);
            }
        }
        cmd.arg("--config").arg(&self.config_path);
        cmd
    }
}
