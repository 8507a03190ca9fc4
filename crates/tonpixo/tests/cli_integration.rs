//! CLI integration tests for the Tonpixo command-line interface.
//!
//! These tests verify:
//! - Help text is displayed correctly
//! - Argument parsing works as expected
//! - Local-only commands (config, history, chats) work against a temp dir
//!
//! Note: nothing here talks to the capability service or the model.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Get a command for the tonpixo binary with an isolated config directory.
fn tonpixo(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("tonpixo").unwrap();
    cmd.env("TONPIXO_CONFIG_DIR", dir.path())
        .env("TONPIXO_PROJECT_DIR", dir.path())
        .env_remove("TONPIXO_DB_PATH")
        .env_remove("MCP_BASE_URL")
        .env_remove("MCP_BEARER_TOKEN")
        .env_remove("TONPIXO_MCP_DIR")
        .env_remove("MCP_PROJECT_DIR")
        .env("AWS_LAMBDA_FUNCTION_NAME", "cli-test");
    cmd
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_displays() {
    let dir = TempDir::new().unwrap();
    tonpixo(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("TON wallet analyst"));
}

#[test]
fn test_version_displays() {
    let dir = TempDir::new().unwrap();
    tonpixo(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tonpixo"));
}

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    tonpixo(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ask"))
        .stdout(predicate::str::contains("resources"))
        .stdout(predicate::str::contains("tools"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("chats"))
        .stdout(predicate::str::contains("config"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_ask_requires_question() {
    let dir = TempDir::new().unwrap();
    tonpixo(&dir)
        .args(["ask", "--job", "J1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("QUESTION"));
}

#[test]
fn test_ask_requires_job() {
    let dir = TempDir::new().unwrap();
    tonpixo(&dir)
        .env_remove("TONPIXO_JOB_ID")
        .args(["ask", "How much did I send?"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--job"));
}

#[test]
fn test_unknown_subcommand_rejected() {
    let dir = TempDir::new().unwrap();
    tonpixo(&dir).arg("serve").assert().failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// Local Commands
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_json_uses_defaults() {
    let dir = TempDir::new().unwrap();
    tonpixo(&dir)
        .args(["--json", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"recursion_limit\": 15"))
        .stdout(predicate::str::contains("\"prompt_mode\": \"lean\""));
}

#[test]
fn test_config_show_redacts_token() {
    let dir = TempDir::new().unwrap();
    tonpixo(&dir)
        .env("MCP_BEARER_TOKEN", "super-secret")
        .args(["--json", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("super-secret").not())
        .stdout(predicate::str::contains("********"));
}

#[test]
fn test_config_reads_project_toml() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("tonpixo.toml"),
        "[agent]\nrecursion_limit = 7\n",
    )
    .unwrap();

    tonpixo(&dir)
        .args(["--json", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"recursion_limit\": 7"));
}

#[test]
fn test_history_of_unknown_chat_is_empty() {
    let dir = TempDir::new().unwrap();
    tonpixo(&dir)
        .args(["history", "nope"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No turns in chat nope."));
    assert!(dir.path().join("tonpixo.db").exists());
}

#[test]
fn test_chats_json_is_empty_list() {
    let dir = TempDir::new().unwrap();
    tonpixo(&dir)
        .args(["--json", "chats", "--user", "u1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability Service Errors
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn test_resources_failure_shows_upstream_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/resources"))
        .respond_with(ResponseTemplate::new(403).set_body_string("token revoked"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let uri = server.uri();
    let assert = tokio::task::spawn_blocking(move || {
        tonpixo(&dir)
            .env("MCP_BASE_URL", uri)
            .env("MCP_RETRY_MAX", "0")
            .args(["resources", "list"])
            .assert()
    })
    .await
    .unwrap();

    assert
        .failure()
        .stderr(predicate::str::contains("status=403"))
        .stderr(predicate::str::contains("token revoked"));
}
