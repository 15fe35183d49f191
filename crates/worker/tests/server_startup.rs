//! Startup tests that exercise the real binary: spawn tallyd with a temp
//! config, poll its HTTP surface, and check it refuses broken configs.

use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Write a minimal valid config into the temp dir; the database lands
/// there too so tests never litter the working directory.
fn write_minimal_config(dir: &TempDir, port: u16) -> std::path::PathBuf {
    let db_path = dir.path().join("tally.db");
    let config = format!(
        r#"
[llm]
provider = "ollama"

[server]
host = "127.0.0.1"
port = {}

[database]
path = "{}"
"#,
        port,
        db_path.display()
    );
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, config).unwrap();
    config_path
}

/// Spawn the server and return a handle
fn spawn_server(config_path: &Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_tallyd"))
        .env("TALLY_CONFIG", config_path)
        .env("RUST_LOG", "error") // Quiet logs during tests
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/healthz", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let config_path = write_minimal_config(&dir, port);

    let mut server = spawn_server(&config_path);
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/healthz", port))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["status"], "ok");
    assert_eq!(json["orchestrator"]["running"], true);
    assert_eq!(json["orchestrator"]["active_runs"], 0);

    server.kill().await.ok();
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_counters() {
    let dir = TempDir::new().unwrap();
    let port = get_available_port();
    let config_path = write_minimal_config(&dir, port);

    let mut server = spawn_server(&config_path);
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let body = client
        .get(format!("http://127.0.0.1:{}/metrics", port))
        .send()
        .await
        .expect("Failed to send request")
        .text()
        .await
        .expect("Failed to read body");

    assert!(body.contains("# HELP"));
    assert!(body.contains("tally_orchestrator_running 1"));
    assert!(body.contains("tally_runs_active 0"));
    assert!(body.contains("tally_runs_started_total"));

    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_tallyd"))
            .env("TALLY_CONFIG", "/nonexistent/config.toml")
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}

#[tokio::test]
async fn test_missing_llm_section_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let config_without_llm = r#"
[server]
port = 8080
"#;
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, config_without_llm).unwrap();

    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_tallyd"))
            .env("TALLY_CONFIG", &config_path)
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}

#[tokio::test]
async fn test_rejects_invalid_retry_limits() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("tally.db");
    let config = format!(
        r#"
[llm]
provider = "ollama"

[database]
path = "{}"

[orchestrator.retry]
soft_timeout_secs = 120
hard_timeout_secs = 60
"#,
        db_path.display()
    );
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, config).unwrap();

    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_tallyd"))
            .env("TALLY_CONFIG", &config_path)
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}
