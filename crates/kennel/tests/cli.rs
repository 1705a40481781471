//! CLI tests.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn kennel(root: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("kennel").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("KENNEL_CONFIG")
        .env_remove("KENNEL_LIBEXEC")
        .arg("--root")
        .arg(root.path().join("run"));
    cmd
}

#[test]
fn help_lists_commands() {
    Command::cargo_bin("kennel")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("delete"));
}

#[test]
fn list_without_containers() {
    let root = tempfile::tempdir().unwrap();
    kennel(&root)
        .args(["list", "--quiet"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    kennel(&root)
        .args(["list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("[]"));
}

#[test]
fn list_hides_dot_entries() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("run/web")).unwrap();
    std::fs::create_dir_all(root.path().join("run/.tmp")).unwrap();

    kennel(&root)
        .args(["list", "--quiet"])
        .assert()
        .success()
        .stdout("web\n");
}

#[test]
fn state_of_unknown_container() {
    let root = tempfile::tempdir().unwrap();
    kennel(&root)
        .args(["state", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Container not found: ghost"));
}

#[test]
fn kill_rejects_unknown_signal() {
    let root = tempfile::tempdir().unwrap();
    kennel(&root)
        .args(["kill", "web", "SIGNOPE"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown signal"));
}

#[test]
fn create_requires_bundle_config() {
    let root = tempfile::tempdir().unwrap();
    let bundle = root.path().join("bundle");
    std::fs::create_dir_all(&bundle).unwrap();

    kennel(&root)
        .args(["create", "web", "--bundle"])
        .arg(&bundle)
        .assert()
        .failure()
        .stderr(predicate::str::contains("config.json"));
    assert!(!root.path().join("run/web").exists());
}

#[test]
fn invalid_container_id() {
    let root = tempfile::tempdir().unwrap();
    kennel(&root)
        .args(["delete", "bad/id"])
        .assert()
        .failure();
}

#[test]
fn create_requires_helpers() {
    let root = tempfile::tempdir().unwrap();
    let bundle = root.path().join("bundle");
    std::fs::create_dir_all(bundle.join("rootfs")).unwrap();
    std::fs::write(
        bundle.join("config.json"),
        r#"{"root": {"path": "rootfs"}, "process": {"args": ["/bin/sh"]}}"#,
    )
    .unwrap();

    kennel(&root)
        .arg("--libexec")
        .arg(root.path().join("libexec"))
        .args(["create", "web", "--bundle"])
        .arg(&bundle)
        .assert()
        .failure()
        .stderr(predicate::str::contains("kennel-start"));
    assert!(!root.path().join("run/web").exists());
}
