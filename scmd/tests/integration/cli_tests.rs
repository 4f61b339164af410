use std::process::Command;

use scm_common::auth::{AuthGuard, HmacKeyDerivation};

use crate::common::{SECRET, TestInstall, init_test_logging};

#[test]
fn test_scmd_help_includes_usage() {
    init_test_logging();
    crate::test_log!("TEST START: test_scmd_help_includes_usage");

    let output = Command::new(env!("CARGO_BIN_EXE_scmd"))
        .arg("--help")
        .output()
        .expect("Failed to run scmd --help");

    assert!(output.status.success(), "scmd --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage"), "Expected usage, got: {stdout}");
    assert!(stdout.contains("check-config"), "Expected subcommands, got: {stdout}");

    crate::test_log!("TEST PASS: test_scmd_help_includes_usage");
}

#[test]
fn test_scmd_version() {
    init_test_logging();
    let output = Command::new(env!("CARGO_BIN_EXE_scmd"))
        .arg("--version")
        .output()
        .expect("Failed to run scmd --version");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")), "got: {stdout}");
}

#[test]
fn test_check_config_accepts_valid_install() {
    init_test_logging();
    crate::test_log!("TEST START: test_check_config_accepts_valid_install");

    let install = TestInstall::new();
    let output = install
        .command()
        .args(["check-config", "--show"])
        .output()
        .expect("Failed to run scmd check-config");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "check-config failed: {stdout}");
    assert!(stdout.contains("Configuration OK"), "got: {stdout}");
    assert!(stdout.contains("<redacted>"), "got: {stdout}");
    assert!(!stdout.contains(SECRET), "secret leaked: {stdout}");

    crate::test_log!("TEST PASS: test_check_config_accepts_valid_install");
}

#[test]
fn test_check_config_rejects_missing_secret() {
    init_test_logging();
    let install = TestInstall::with_secret(None);
    let output = install
        .command()
        .arg("check-config")
        .output()
        .expect("Failed to run scmd check-config");

    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("daemon.shared_secret"), "got: {stdout}");
}

#[test]
fn test_minted_key_verifies() {
    init_test_logging();
    let install = TestInstall::new();
    let output = install
        .command()
        .arg("mint-key")
        .output()
        .expect("Failed to run scmd mint-key");

    assert!(output.status.success());
    let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let guard = AuthGuard::new(
        Box::new(HmacKeyDerivation::new(SECRET.as_bytes()).unwrap()),
        300,
    );
    guard.verify(&key).expect("minted key should verify");

    let other = AuthGuard::new(Box::new(HmacKeyDerivation::new(b"other").unwrap()), 300);
    assert!(other.verify(&key).is_err());
}

#[test]
fn test_serve_refuses_missing_secret() {
    init_test_logging();
    let install = TestInstall::with_secret(None);
    let output = install
        .command()
        .arg("serve")
        .output()
        .expect("Failed to run scmd serve");

    assert!(!output.status.success());
    assert!(!install.socket_path.exists());
}
