//! Runs the `atlas` binary against a temporary database. None of these
//! commands reach the network.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn atlas_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("atlas");
    path
}

fn setup_test_env(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/atlas.sqlite"

[github]
api_url = "http://127.0.0.1:9"
token_env = "REPO_ATLAS_TEST_TOKEN_THAT_IS_NOT_SET"
max_retries = 0

[generation]
provider = "disabled"

[server]
bind = "127.0.0.1:7341"
{}
"#,
        root.display(),
        extra
    );

    let config_path = config_dir.join("atlas.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_atlas(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = atlas_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run atlas binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config) = setup_test_env("");

    let (stdout, stderr, success) = run_atlas(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));
    assert!(tmp.path().join("data/atlas.sqlite").exists());

    // Idempotent
    let (_, stderr, success) = run_atlas(&config, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_status_of_unknown_repository_fails() {
    let (_tmp, config) = setup_test_env("");
    run_atlas(&config, &["init"]);

    let (_, stderr, success) = run_atlas(&config, &["status", "acme/app"]);
    assert!(!success);
    assert!(stderr.contains("acme/app has never been analyzed"), "{}", stderr);
}

#[test]
fn test_invalid_reference_is_rejected() {
    let (_tmp, config) = setup_test_env("");
    run_atlas(&config, &["init"]);

    let (_, stderr, success) = run_atlas(&config, &["status", "not a repo!!"]);
    assert!(!success);
    assert!(stderr.contains("invalid repository reference"), "{}", stderr);

    let (_, stderr, success) = run_atlas(&config, &["analyze", "https://gitlab.com/acme/app"]);
    assert!(!success);
    assert!(stderr.contains("unsupported repository host"), "{}", stderr);
}

#[test]
fn test_queries_require_a_completed_analysis() {
    let (_tmp, config) = setup_test_env("");
    run_atlas(&config, &["init"]);

    for args in [
        vec!["subsystems", "acme/app"],
        vec!["graph", "acme/app"],
        vec!["describe", "acme/app", "Routes"],
        vec!["history", "acme/app"],
    ] {
        let (_, stderr, success) = run_atlas(&config, &args);
        assert!(!success, "{:?} should fail", args);
        assert!(
            stderr.contains("acme/app has no completed analysis"),
            "{:?}: {}",
            args,
            stderr
        );
    }
}

#[test]
fn test_invalid_config_is_reported() {
    let (_tmp, config) = setup_test_env("[cache]\nttl_secs = 0\n");

    let (_, stderr, success) = run_atlas(&config, &["init"]);
    assert!(!success);
    assert!(stderr.contains("cache.ttl_secs must be > 0"), "{}", stderr);
}

#[test]
fn test_missing_config_is_reported() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (_, stderr, success) = run_atlas(&missing, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}

#[test]
fn test_help_lists_commands() {
    let (_tmp, config) = setup_test_env("");

    let (stdout, _, success) = run_atlas(&config, &["--help"]);
    assert!(success);
    for command in ["analyze", "describe-all", "explain", "graph", "chat", "serve"] {
        assert!(stdout.contains(command), "help is missing {}", command);
    }
}
