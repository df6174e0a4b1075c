//! CLI integration tests
//!
//! These tests run the botpack binary and check:
//! - Command parsing and help output
//! - Output formatting
//! - Exit codes

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Path to the botpack binary next to the test executable
fn botpack_bin() -> PathBuf {
    let mut path = env::current_exe()
        .expect("Failed to get current executable path")
        .parent()
        .expect("No parent")
        .to_path_buf();

    // If we're in deps/, go up one more level
    if path.ends_with("deps") {
        path = path.parent().expect("No parent").to_path_buf();
    }

    path.join("botpack")
}

fn botpack(store: &Path, args: &[&str]) -> Output {
    Command::new(botpack_bin())
        .args(args)
        .env("BOTPACK_STORE_DIR", store)
        .env("BOTPACK_BACKEND", "local")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute botpack")
}

fn create_bot_repo(dir: &Path) {
    fs::write(dir.join("requirements.txt"), "python-telegram-bot==20.7\n")
        .expect("Failed to write requirements.txt");
    fs::write(dir.join("main.py"), "print('bot')\n").expect("Failed to write main.py");
}

#[test]
fn test_cli_help() {
    let store = TempDir::new().unwrap();
    let output = botpack(store.path(), &["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["plan", "render", "lint", "build", "verify", "preflight", "prune"] {
        assert!(stdout.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_plan_json() {
    let store = TempDir::new().unwrap();
    let output = botpack(store.path(), &["plan", "--format", "json"]);

    assert!(output.status.success());
    let plan: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("plan output is JSON");
    let directives = plan["directives"].as_array().unwrap();
    assert_eq!(directives.len(), 9);
    assert_eq!(directives[0]["directive"], "select-base");
    assert_eq!(directives[8]["directive"], "entrypoint");
}

#[test]
fn test_render_to_file() {
    let store = TempDir::new().unwrap();
    let out = store.path().join("Dockerfile");
    let output = botpack(
        store.path(),
        &["render", "-o", out.to_str().unwrap()],
    );

    assert!(output.status.success());
    let dockerfile = fs::read_to_string(&out).unwrap();
    assert!(dockerfile.starts_with("FROM python:3.11-slim"));
    let manifest = dockerfile.find("COPY requirements.txt .").unwrap();
    let source = dockerfile.find("COPY . .").unwrap();
    assert!(manifest < source);
}

#[test]
fn test_lint_exit_code() {
    let dir = TempDir::new().unwrap();
    let dockerfile = dir.path().join("Dockerfile");
    fs::write(
        &dockerfile,
        "FROM python:3.11-slim\nWORKDIR /app\nCOPY . .\nRUN pip install -r requirements.txt\nCMD python main.py\n",
    )
    .unwrap();

    let output = botpack(dir.path(), &["lint", dockerfile.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("ExecFormEntrypoint"));

    let missing = botpack(dir.path(), &["lint", "/nonexistent/Dockerfile"]);
    assert_eq!(missing.status.code(), Some(2));
}

#[test]
fn test_dry_run_build_then_verify() {
    let store = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    create_bot_repo(repo.path());

    let output = botpack(
        store.path(),
        &[
            "build",
            repo.path().to_str().unwrap(),
            "-t",
            "testbot:ci",
            "--dry-run",
            "-q",
        ],
    );
    assert!(
        output.status.success(),
        "build failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Built testbot:ci-dry-run (local backend)"));

    let output = botpack(
        store.path(),
        &["verify", "testbot:ci-dry-run", "--format", "json"],
    );
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["violations"].as_array().unwrap().len(), 0);
    assert_eq!(report["filesystem_checked"], true);

    // the rehearsal never takes the real tag
    let output = botpack(store.path(), &["verify", "testbot:ci"]);
    assert_eq!(output.status.code(), Some(1));
}

fn cached_directives(build_json: &[u8]) -> usize {
    let outcome: serde_json::Value = serde_json::from_slice(build_json).unwrap();
    outcome["directives"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|d| d["status"] == "cached")
        .count()
}

#[test]
fn test_cache_disabled_by_environment() {
    let store = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    create_bot_repo(repo.path());
    let args = [
        "build",
        repo.path().to_str().unwrap(),
        "--dry-run",
        "-q",
        "--format",
        "json",
    ];

    let first = botpack(store.path(), &args);
    assert!(first.status.success());
    let cached = botpack(store.path(), &args);
    assert!(cached.status.success());
    assert_eq!(cached_directives(&cached.stdout), 6);

    let uncached = Command::new(botpack_bin())
        .args(args)
        .env("BOTPACK_STORE_DIR", store.path())
        .env("BOTPACK_BACKEND", "local")
        .env("BOTPACK_CACHE_ENABLED", "false")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute botpack");
    assert!(uncached.status.success());
    assert_eq!(cached_directives(&uncached.stdout), 0);
}

#[test]
fn test_prune_after_rebuild() {
    let store = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    create_bot_repo(repo.path());
    let build = ["build", repo.path().to_str().unwrap(), "--dry-run", "-q"];

    assert!(botpack(store.path(), &build).status.success());
    fs::write(repo.path().join("requirements.txt"), "python-telegram-bot==21.0\n").unwrap();
    assert!(botpack(store.path(), &build).status.success());

    let output = botpack(store.path(), &["prune", "--format", "json"]);
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["images_removed"].as_array().unwrap().len(), 1);
    assert!(report["layers_removed"].as_u64().unwrap() > 0);

    let output = botpack(store.path(), &["verify", "bot:latest-dry-run"]);
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_verify_unknown_image() {
    let store = TempDir::new().unwrap();
    let output = botpack(store.path(), &["verify", "nosuch:tag"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_build_missing_manifest_fails() {
    let store = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    fs::write(repo.path().join("main.py"), "print('bot')\n").unwrap();

    let output = botpack(
        store.path(),
        &["build", repo.path().to_str().unwrap(), "--dry-run"],
    );
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("stage-manifest"));
}

#[test]
fn test_preflight_env_file() {
    let dir = TempDir::new().unwrap();
    let recipe = dir.path().join("botpack.yaml");
    fs::write(
        &recipe,
        "runtime:\n  required_env:\n    - TELEGRAM_BOT_TOKEN\n    - OPENAI_API_KEY\n",
    )
    .unwrap();
    let env_file = dir.path().join(".env");
    fs::write(&env_file, "TELEGRAM_BOT_TOKEN=123:abc\n").unwrap();

    let output = botpack(
        dir.path(),
        &[
            "preflight",
            "--recipe",
            recipe.to_str().unwrap(),
            "--env-file",
            env_file.to_str().unwrap(),
            "--format",
            "json",
        ],
    );
    assert_eq!(output.status.code(), Some(1));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["missing"][0], "OPENAI_API_KEY");
    assert_eq!(report["present"][0], "TELEGRAM_BOT_TOKEN");
}

#[test]
fn test_config_json() {
    let store = TempDir::new().unwrap();
    let output = botpack(store.path(), &["config", "--format", "json"]);

    assert!(output.status.success());
    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(config["backend"], "local");
    assert_eq!(config["store_dir"], store.path().display().to_string());
}
