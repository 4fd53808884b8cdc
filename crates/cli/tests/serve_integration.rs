//! Integration tests for the `intentful serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port,
//! makes HTTP requests, and verifies the responses.

use std::io::Read;
use std::net::TcpStream;
use std::path::Path;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

/// Base port is derived from the process ID so separate test binaries
/// don't collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 30000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// Kills the server when a test finishes, pass or fail.
struct Server {
    child: Child,
    port: u16,
    _dir: TempDir,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn provider_json() -> Value {
    // Handler URLs point at a closed port; dispatch failures only back off.
    json!({
        "prefix": "cloud",
        "version": "1",
        "kinds": [
            {
                "name": "vm",
                "intentful_behaviour": "differ-based",
                "kind_structure": {
                    "vm": {
                        "type": "object",
                        "properties": {"cpu": {"type": "integer"}}
                    }
                },
                "intentful_signatures": [{
                    "name": "cpu",
                    "signature": "cpu",
                    "procedure_callback": "http://127.0.0.1:9/cpu",
                    "base_callback": "http://127.0.0.1:9"
                }]
            },
            {
                "name": "tag",
                "intentful_behaviour": "immediate-mirror",
                "kind_structure": {}
            }
        ]
    })
}

fn start_server() -> Server {
    let dir = TempDir::new().expect("tempdir");
    let provider = dir.path().join("provider.json");
    std::fs::write(&provider, provider_json().to_string()).expect("write provider");
    let config = dir.path().join("engine.toml");
    std::fs::write(
        &config,
        "diff_resolve_delay = 100\nintent_resolve_delay = 100\nentity_poll_delay = 50\ndebug = true\nhandler_timeout = 1\n",
    )
    .expect("write config");

    let port = next_port();
    let child = spawn(port, &config, &provider);
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Server {
        child,
        port,
        _dir: dir,
    }
}

fn spawn(port: u16, config: &Path, provider: &Path) -> Child {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_intentful"));
    cmd.arg("serve")
        .arg("--port")
        .arg(port.to_string())
        .arg("--config")
        .arg(config)
        .arg(provider);
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());
    cmd.spawn().expect("failed to start intentful serve")
}

fn request(port: u16, method: &str, path: &str, body: Option<&Value>) -> (u16, Value) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let body = body.map(|b| b.to_string()).unwrap_or_default();
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost:{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        method,
        path,
        port,
        body.len(),
        body
    );
    std::io::Write::write_all(&mut stream, request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);
    parse_http_response(&response)
}

fn get(port: u16, path: &str) -> (u16, Value) {
    request(port, "GET", path, None)
}

fn post(port: u16, path: &str, body: &Value) -> (u16, Value) {
    request(port, "POST", path, Some(body))
}

/// Parse an HTTP response into (status_code, JSON body or Null).
fn parse_http_response(response: &str) -> (u16, Value) {
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("");
    let body = parts.next().unwrap_or("");
    let status = headers
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);
    (status, serde_json::from_str(body).unwrap_or(Value::Null))
}

// ──────────────────────────────────────────────
// Health and routing
// ──────────────────────────────────────────────

#[test]
fn health_reports_ok() {
    let server = start_server();
    let (status, body) = get(server.port, "/health");
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[test]
fn unknown_route_is_json_404() {
    let server = start_server();
    let (status, body) = get(server.port, "/nope");
    assert_eq!(status, 404);
    assert_eq!(body["error"], "not found");
}

// ──────────────────────────────────────────────
// Providers
// ──────────────────────────────────────────────

#[test]
fn provider_registered_at_startup() {
    let server = start_server();
    let (status, body) = get(server.port, "/provider/cloud/1");
    assert_eq!(status, 200);
    assert_eq!(body["kinds"].as_array().unwrap().len(), 2);
}

#[test]
fn provider_registration_and_removal() {
    let server = start_server();
    let mut other = provider_json();
    other["prefix"] = json!("edge");
    let (status, _) = post(server.port, "/provider", &other);
    assert_eq!(status, 200);

    let (status, _) = request(server.port, "DELETE", "/provider/edge/1", None);
    assert_eq!(status, 204);
    let (status, body) = get(server.port, "/provider/edge/1");
    assert_eq!(status, 404);
    assert!(body["error"].as_str().unwrap().contains("edge/1"));
}

#[test]
fn bad_provider_is_400() {
    let server = start_server();
    let mut bad = provider_json();
    bad["prefix"] = json!("broken");
    bad["kinds"][0]["intentful_signatures"][0]["signature"] = json!("cpu.");
    let (status, body) = post(server.port, "/provider", &bad);
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("broken/1/vm"));
}

// ──────────────────────────────────────────────
// Entities
// ──────────────────────────────────────────────

#[test]
fn entity_lifecycle() {
    let server = start_server();
    let port = server.port;

    let (status, created) = post(
        port,
        "/services/cloud/1/vm",
        &json!({"spec": {"cpu": 2}, "uuid": "vm-1"}),
    );
    assert_eq!(status, 200, "{created}");
    assert_eq!(created["metadata"]["spec_version"], 1);
    assert_eq!(created["status"], json!({"cpu": 2}));
    assert!(created["intent_watcher"].is_null());

    let (status, entity) = get(port, "/services/cloud/1/vm/vm-1");
    assert_eq!(status, 200);
    assert_eq!(entity["spec"], json!({"cpu": 2}));

    let (status, list) = get(port, "/services/cloud/1/vm");
    assert_eq!(status, 200);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, updated) = request(
        port,
        "PUT",
        "/services/cloud/1/vm/vm-1",
        Some(&json!({"spec": {"cpu": 3}, "spec_version": 1})),
    );
    assert_eq!(status, 200, "{updated}");
    assert_eq!(updated["metadata"]["spec_version"], 2);
    let watcher_uuid = updated["intent_watcher"]["uuid"].as_str().unwrap().to_string();

    let (status, watcher) = get(port, &format!("/services/intent_watcher/{}", watcher_uuid));
    assert_eq!(status, 200);
    assert_eq!(watcher["diffs"].as_array().unwrap().len(), 1);
    assert_eq!(watcher["diffs"][0]["diff_fields"][0]["status"], json!([null]));

    let (status, body) = request(
        port,
        "PUT",
        "/services/cloud/1/vm/vm-1",
        Some(&json!({"spec": {"cpu": 4}, "spec_version": 1})),
    );
    assert_eq!(status, 409);
    assert!(body["error"].as_str().unwrap().contains("spec version conflict"));

    let (status, _) = request(port, "DELETE", "/services/cloud/1/vm/vm-1", None);
    assert_eq!(status, 200);
    let (status, _) = get(port, "/services/cloud/1/vm/vm-1");
    assert_eq!(status, 404);
}

#[test]
fn invalid_spec_is_400_and_unknown_kind_404() {
    let server = start_server();
    let (status, body) = post(
        server.port,
        "/services/cloud/1/vm",
        &json!({"spec": {"cpu": "many"}}),
    );
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("validation failed"));

    let (status, _) = post(server.port, "/services/cloud/1/disk", &json!({"spec": {}}));
    assert_eq!(status, 404);
}

#[test]
fn duplicate_uuid_is_409() {
    let server = start_server();
    let body = json!({"spec": {"cpu": 1}, "uuid": "dup"});
    let (status, _) = post(server.port, "/services/cloud/1/vm", &body);
    assert_eq!(status, 200);
    let (status, _) = post(server.port, "/services/cloud/1/vm", &body);
    assert_eq!(status, 409);
}

#[test]
fn mirror_kind_copies_spec() {
    let server = start_server();
    let (status, created) = post(
        server.port,
        "/services/cloud/1/tag",
        &json!({"spec": {"color": "red"}}),
    );
    assert_eq!(status, 200);
    assert_eq!(created["status"], json!({"color": "red"}));
    assert!(created.get("intent_watcher").map_or(true, Value::is_null));
}

// ──────────────────────────────────────────────
// Handler callbacks and watcher convergence
// ──────────────────────────────────────────────

#[test]
fn status_callback_completes_watcher() {
    let server = start_server();
    let port = server.port;
    let (status, _) = post(
        port,
        "/services/cloud/1/vm",
        &json!({"spec": {"cpu": 1}, "uuid": "vm-cb"}),
    );
    assert_eq!(status, 200);
    let (status, updated) = request(
        port,
        "PUT",
        "/services/cloud/1/vm/vm-cb",
        Some(&json!({"spec": {"cpu": 8}, "spec_version": 1})),
    );
    assert_eq!(status, 200, "{updated}");
    let watcher_uuid = updated["intent_watcher"]["uuid"].as_str().unwrap().to_string();
    let entity_ref = json!({
        "provider_prefix": "cloud",
        "provider_version": "1",
        "kind": "vm",
        "uuid": "vm-cb"
    });

    let (status, body) = post(
        port,
        "/provider/update_status",
        &json!({"entity_ref": entity_ref, "status": {"cpu": 8}}),
    );
    assert_eq!(status, 200, "{body}");
    assert!(body["status_hash"].is_string());

    let stale = post(
        port,
        "/provider/update_status",
        &json!({"entity_ref": entity_ref, "status": {"cpu": 9}, "status_hash": "stale"}),
    );
    assert_eq!(stale.0, 409);

    let mut watcher_status = Value::Null;
    for _ in 0..50 {
        let (_, watcher) = get(port, &format!("/services/intent_watcher/{}", watcher_uuid));
        watcher_status = watcher["status"].clone();
        if watcher_status == "completed_successfully" {
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    assert_eq!(watcher_status, "completed_successfully");

    let (status, listed) = get(port, "/services/intent_watcher?status=completed_successfully");
    assert_eq!(status, 200);
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].get("diffs").is_none());
}

#[test]
fn missing_watcher_is_404() {
    let server = start_server();
    let (status, _) = get(server.port, "/services/intent_watcher/none");
    assert_eq!(status, 404);
}
