//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! End-to-end runs of the lxcctl binary on the in-memory backend

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// The binary with its config home and container path inside `dir`.
fn lxcctl(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("lxcctl").unwrap();
    cmd.env("XDG_CONFIG_HOME", dir.path().join("config"))
        .env("HOME", dir.path())
        .env_remove("LXCCTL_BACKEND")
        .env_remove("LXCCTL_LXCPATH")
        .env_remove("LXCCTL_CONFIG")
        .env_remove("RUST_LOG")
        .arg("--backend")
        .arg("memory")
        .arg("--lxcpath")
        .arg(dir.path());
    cmd
}

#[test]
fn version_names_both_components() {
    let dir = tempfile::tempdir().unwrap();
    lxcctl(&dir)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("lxcctl version"))
        .stdout(predicate::str::contains("memory version"));
}

#[test]
fn completion_script() {
    let dir = tempfile::tempdir().unwrap();
    lxcctl(&dir)
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("lxcctl"));
}

#[test]
fn man_page() {
    let dir = tempfile::tempdir().unwrap();
    lxcctl(&dir)
        .arg("man")
        .assert()
        .success()
        .stdout(predicate::str::contains(".TH"));
}

#[test]
fn doctor_json_report() {
    let dir = tempfile::tempdir().unwrap();
    lxcctl(&dir)
        .args(["doctor", "--all", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"checks\""))
        .stdout(predicate::str::contains("runtime_version"));
}

#[test]
fn create_reports_new_container() {
    let dir = tempfile::tempdir().unwrap();
    lxcctl(&dir)
        .args(["create", "web", "-t", "busybox"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created container: web"));
}

#[test]
fn commands_on_missing_container_fail() {
    let dir = tempfile::tempdir().unwrap();
    for args in [
        vec!["start", "ghost"],
        vec!["stop", "ghost"],
        vec!["info", "ghost"],
        vec!["attach", "ghost", "--", "true"],
        vec!["snapshot", "ls", "ghost"],
    ] {
        lxcctl(&dir)
            .args(&args)
            .assert()
            .failure()
            .stderr(predicate::str::contains("ghost does not exist"));
    }
}

#[test]
fn ls_empty_path() {
    let dir = tempfile::tempdir().unwrap();
    lxcctl(&dir)
        .args(["ls", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn wait_for_current_state_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    lxcctl(&dir)
        .args(["wait", "web", "STOPPED", "--timeout", "1"])
        .assert()
        .success();
    lxcctl(&dir)
        .args(["wait", "web", "RUNNING", "--timeout", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Timed out"));
}

#[test]
fn unknown_config_key_rejected() {
    let dir = tempfile::tempdir().unwrap();
    lxcctl(&dir)
        .args(["config", "set", "web", "lxc.bogus", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a configuration key"));
}

#[test]
fn bad_backend_rejected() {
    let dir = tempfile::tempdir().unwrap();
    Command::cargo_bin("lxcctl")
        .unwrap()
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["--backend", "docker", "version"])
        .assert()
        .failure();
}

#[test]
fn explicit_settings_file_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    lxcctl(&dir)
        .arg("--config")
        .arg(dir.path().join("missing.toml"))
        .arg("version")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read settings"));
}

#[test]
fn settings_file_selects_backend() {
    let dir = tempfile::tempdir().unwrap();
    let settings = dir.path().join("lxcctl.toml");
    std::fs::write(&settings, "backend = \"memory\"\n").unwrap();

    Command::cargo_bin("lxcctl")
        .unwrap()
        .env("XDG_CONFIG_HOME", dir.path())
        .env_remove("LXCCTL_BACKEND")
        .arg("--config")
        .arg(&settings)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("memory version"));
}

#[test]
fn execute_prints_command_output() {
    let dir = tempfile::tempdir().unwrap();
    lxcctl(&dir)
        .args(["execute", "job", "--", "sh", "-c", "echo from-job; echo oops >&2"])
        .assert()
        .success()
        .stdout(predicate::eq("from-job\noops\n"));
    lxcctl(&dir)
        .args(["execute", "job", "--", "false"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to execute in job"));
}
