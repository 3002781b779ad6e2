//! End-to-end tests of the `pixiscope` binary against the simulated page.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// The binary, isolated from any config files of the machine running it.
fn pixiscope(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pixiscope").unwrap();
    cmd.env("HOME", home.path())
        .env_remove("PIXISCOPE_HOST")
        .env_remove("PIXISCOPE_PORT")
        .env_remove("PIXISCOPE_TARGET")
        .env_remove("RUST_LOG")
        .current_dir(home.path());
    cmd
}

fn stdout_json(home: &TempDir, args: &[&str]) -> serde_json::Value {
    let output = pixiscope(home).args(args).output().unwrap();
    assert!(output.status.success(), "{args:?} failed: {output:?}");
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_info_simulated() {
    let home = TempDir::new().unwrap();
    let info = stdout_json(&home, &["--simulate", "info"]);
    assert_eq!(info["found"], true);
    assert_eq!(info["majorVersion"], 8);
    assert_eq!(info["rendererType"], "webgl");
}

#[test]
fn test_scene_tree_outline() {
    let home = TempDir::new().unwrap();
    pixiscope(&home)
        .args(["scene", "--tree", "--simulate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("AnimatedSprite hero"))
        .stdout(predicate::str::contains("debug-overlay").not());
}

#[test]
fn test_stats_matches_scene() {
    let home = TempDir::new().unwrap();
    let scene = stdout_json(&home, &["--simulate", "scene"]);
    let stats = stdout_json(&home, &["--simulate", "stats"]);

    fn count(node: &serde_json::Value) -> u64 {
        1 + node["children"]
            .as_array()
            .map(|c| c.iter().map(count).sum())
            .unwrap_or(0)
    }
    assert_eq!(stats["total"].as_u64().unwrap(), count(&scene));
}

#[test]
fn test_stats_watch_prints_each_poll() {
    let home = TempDir::new().unwrap();
    let output = pixiscope(&home)
        .args(["--simulate", "stats", "--watch", "--interval", "10", "--count", "3"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert_eq!(text.matches("\"total\"").count(), 3);
}

#[test]
fn test_textures_and_instructions() {
    let home = TempDir::new().unwrap();
    let textures = stdout_json(&home, &["--simulate", "textures"]);
    assert_eq!(textures["count"], 4);
    let instructions = stdout_json(&home, &["--simulate", "instructions"]);
    assert_eq!(instructions["count"], 14);
}

#[test]
fn test_capture_reports_pipes() {
    let home = TempDir::new().unwrap();
    let capture = stdout_json(&home, &["--simulate", "capture"]);
    assert_eq!(capture["drawCallsCounted"], true);
    assert!(capture["totalDrawCalls"].as_u64().unwrap() > 0);
    assert!(capture["pipeTimings"]["batch"]["count"].as_u64().unwrap() >= 1);
}

#[test]
fn test_benchmark_duration() {
    let home = TempDir::new().unwrap();
    let result = stdout_json(&home, &["--simulate", "benchmark", "--duration", "200"]);
    assert_eq!(result["duration"], 200);
    assert!(result["frameCount"].as_u64().unwrap() > 0);
    assert!(result["elapsed"].as_f64().unwrap() >= 200.0);
}

#[test]
fn test_benchmark_rejects_zero_duration() {
    let home = TempDir::new().unwrap();
    let result = stdout_json(&home, &["--simulate", "benchmark", "--duration", "0"]);
    assert!(result["error"].as_str().unwrap().starts_with("Invalid argument"));
}

#[test]
fn test_inspect_and_query() {
    let home = TempDir::new().unwrap();
    let root = stdout_json(&home, &["--simulate", "inspect", "--index", "0"]);
    assert_eq!(root["index"], 0);
    assert!(root.get("children").is_none());
    assert!(root["childCount"].as_u64().unwrap() > 0);

    let hero = stdout_json(&home, &["--simulate", "inspect", "--filter", "HERO"]);
    assert_eq!(hero["name"], "hero");

    let hits = stdout_json(&home, &["--simulate", "query", "sprite"]);
    let hits = hits.as_array().unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| {
        let kind = h["type"].as_str().unwrap().to_lowercase();
        let name = h["name"].as_str().unwrap_or_default().to_lowercase();
        kind.contains("sprite") || name.contains("sprite")
    }));
}

#[test]
fn test_inspect_out_of_range_fails() {
    let home = TempDir::new().unwrap();
    pixiscope(&home)
        .args(["--simulate", "inspect", "--index", "9999"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no node at index 9999"));
}

#[test]
fn test_console_needs_browser() {
    let home = TempDir::new().unwrap();
    pixiscope(&home)
        .args(["--simulate", "console"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires a browser connection"));
}

#[test]
fn test_connection_refused_hint() {
    let home = TempDir::new().unwrap();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    pixiscope(&home)
        .args(["--host", "127.0.0.1", "--port", &port.to_string(), "info"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("connection refused"))
        .stderr(predicate::str::contains("Hint"));
}

#[test]
fn test_workspace_config_is_read() {
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join(".pixiscope.toml"), "port = [broken").unwrap();
    pixiscope(&home)
        .args(["--simulate", "info"])
        .assert()
        .failure()
        .stderr(predicate::str::contains(".pixiscope.toml"));
}
