// End-to-end route tests: context wired from a real config, requests over
// axum-test. The only devices touched are the local host, so these run
// anywhere; docker being absent just degrades container state.

use axum_test::TestServer;
use fleetdeck::config::AppConfig;
use fleetdeck::context::AppContext;
use fleetdeck::routes;
use serde_json::{Value, json};

fn test_context(dir: &tempfile::TempDir) -> std::sync::Arc<AppContext> {
    let fleet_path = dir.path().join("fleet.toml");
    let config_str = format!(
        r#"
[server]
port = 8090
host = "127.0.0.1"

[fleet]
path = "{}"

[monitoring]
poll_interval_secs = 30
stats_log_interval_secs = 60

[scheduler]
tick_interval_ms = 1000
"#,
        fleet_path.to_str().unwrap()
    );
    let config = AppConfig::load_from_str(&config_str).expect("config");
    AppContext::new(config).expect("context")
}

#[tokio::test]
async fn version_reports_package_identity() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::new(routes::app(test_context(&dir)));

    let response = server.get("/version").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["name"], "fleetdeck");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn fleet_starts_with_the_local_host() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::new(routes::app(test_context(&dir)));

    let response = server.get("/api/devices").await;
    response.assert_status_ok();
    let devices: Value = response.json();
    assert_eq!(devices.as_array().unwrap().len(), 1);
    assert_eq!(devices[0]["id"], "local");
    assert_eq!(devices[0]["isLocal"], true);
}

#[tokio::test]
async fn status_read_defaults_offline_then_refresh_commits_online() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::new(routes::app(test_context(&dir)));

    // Never refreshed: offline default, not an error.
    let response = server.get("/api/devices/local/status").await;
    response.assert_status_ok();
    let snapshot: Value = response.json();
    assert_eq!(snapshot["online"], false);
    assert_eq!(snapshot["loading"], false);

    // On-demand refresh probes the local host and commits online.
    let response = server.post("/api/devices/local/refresh").await;
    response.assert_status_ok();
    let snapshot: Value = response.json();
    assert_eq!(snapshot["online"], true);
    assert!(snapshot["metrics"]["ramTotal"].as_u64().unwrap() > 0);

    let response = server.get("/api/devices/local/status").await;
    let snapshot: Value = response.json();
    assert_eq!(snapshot["online"], true);
}

#[tokio::test]
async fn unknown_device_is_a_404() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::new(routes::app(test_context(&dir)));

    server.get("/api/devices/ghost/status").await.assert_status_not_found();
    server.post("/api/devices/ghost/refresh").await.assert_status_not_found();
}

#[tokio::test]
async fn invalid_device_definition_is_a_400() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::new(routes::app(test_context(&dir)));

    // Remote device with neither ssh nor wol.
    let response = server
        .post("/api/devices")
        .json(&json!({
            "id": "nas",
            "name": "NAS",
            "address": "192.0.2.20"
        }))
        .await;
    response.assert_status_bad_request();
}

#[tokio::test]
async fn job_lifecycle_over_rest() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::new(routes::app(test_context(&dir)));

    // Malformed cron is rejected at creation time.
    let response = server
        .post("/api/jobs")
        .json(&json!({
            "id": "bad",
            "name": "bad job",
            "action": { "kind": "command", "device": "local", "program": "true" },
            "recurrence": { "type": "cron", "expr": "nope" }
        }))
        .await;
    response.assert_status_bad_request();

    let response = server
        .post("/api/jobs")
        .json(&json!({
            "id": "hello",
            "name": "say hello",
            "action": {
                "kind": "command",
                "device": "local",
                "program": "echo",
                "args": ["hello"]
            },
            "recurrence": { "type": "daily", "time": "03:30" }
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);

    let response = server.get("/api/jobs").await;
    let jobs: Value = response.json();
    assert_eq!(jobs.as_array().unwrap().len(), 1);
    assert_eq!(jobs[0]["id"], "hello");
    assert_eq!(jobs[0]["enabled"], true);

    // Manual run executes the echo through the real executor.
    let response = server.post("/api/jobs/hello/run").await;
    response.assert_status_ok();
    let record: Value = response.json();
    assert_eq!(record["outcome"], "success");

    let response = server.get("/api/jobs/hello/history").await;
    let history: Value = response.json();
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["outcome"], "success");

    let response = server.post("/api/jobs/hello/toggle").await;
    let body: Value = response.json();
    assert_eq!(body["enabled"], false);

    server.delete("/api/jobs/hello").await.assert_status(
        axum::http::StatusCode::NO_CONTENT,
    );
    server.get("/api/jobs/hello/history").await.assert_status_not_found();
}

#[tokio::test]
async fn device_crud_and_removal_guards() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::new(routes::app(test_context(&dir)));

    let response = server
        .post("/api/devices")
        .json(&json!({
            "id": "nas",
            "name": "NAS",
            "address": "192.0.2.20",
            "ssh": { "user": "admin" }
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);

    // The new device gets a default offline snapshot immediately.
    let response = server.get("/api/devices/nas/status").await;
    response.assert_status_ok();
    let snapshot: Value = response.json();
    assert_eq!(snapshot["online"], false);

    // A job pinning the device blocks removal.
    server
        .post("/api/jobs")
        .json(&json!({
            "id": "check",
            "name": "uptime check",
            "action": { "kind": "command", "device": "nas", "program": "uptime" },
            "recurrence": { "type": "interval", "every": 5, "unit": "minutes" }
        }))
        .await
        .assert_status(axum::http::StatusCode::CREATED);
    server.delete("/api/devices/nas").await.assert_status_bad_request();

    server.delete("/api/jobs/check").await.assert_status(
        axum::http::StatusCode::NO_CONTENT,
    );
    server.delete("/api/devices/nas").await.assert_status(
        axum::http::StatusCode::NO_CONTENT,
    );
    server.get("/api/devices/nas/status").await.assert_status_not_found();
}
