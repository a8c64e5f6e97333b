//! Binary-level tests that never reach a server.

use assert_cmd::Command;
use predicates::prelude::*;

fn hawrist() -> Command {
    let mut cmd = Command::cargo_bin("hawrist").unwrap();
    cmd.env_remove("HASS_URL")
        .env_remove("HASS_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_commands() {
    hawrist()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("states")
                .and(predicate::str::contains("watch"))
                .and(predicate::str::contains("assist"))
                .and(predicate::str::contains("todo")),
        );
}

#[test]
fn missing_config_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    hawrist()
        .arg("--config")
        .arg(&path)
        .arg("states")
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.toml"));
}

#[test]
fn invalid_entity_id_fails_before_connecting() {
    hawrist()
        .args(["--url", "http://127.0.0.1:9", "--token", "t", "toggle", "kitchen"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid entity id"));
}

#[test]
fn assist_needs_text_or_list() {
    hawrist()
        .args(["--url", "http://127.0.0.1:9", "--token", "t", "assist"])
        .assert()
        .failure();
}
