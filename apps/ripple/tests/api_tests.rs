//! Integration tests for the Ripple HTTP API.
//!
//! Uses axum-test to drive the router without binding a socket.

// Allow holding MutexGuard across await in auth tests - tests are serialized
// intentionally to avoid env var conflicts
#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use axum::http::{HeaderValue, StatusCode, header};
use axum_test::TestServer;
use ripple::api::{
    AppState, DiagnosticsResponse, ExportResponse, GenerationResponse, HashResponse,
    HealthResponse, InputsResponse, OutputsResponse, ReportResponse, StatusResponse,
    create_router,
};
use ripple::config::PipelineConfig;
use ripple_core::{DiagnosticKind, HostOutput, RootInputs, Severity, import_snapshot};
use serde_json::json;
use std::sync::Mutex;

/// Serializes tests that touch `RIPPLE_API_KEY`.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

const PIPELINE: &str = r#"
[[stage]]
name = "upper"
op = "upper"
input = "roots"

[[stage]]
name = "out"
op = "host"
input = "upper"

[[stage]]
name = "todo"
op = "diagnostic"
input = "roots"
arg = "TODO"

[[stage]]
name = "guard"
op = "fail_if"
input = "roots"
arg = "boom"

[[stage]]
name = "version"
op = "constant"
arg = "1"
"#;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        // SAFETY: Tests run sequentially under ENV_MUTEX, so no concurrent env access.
        unsafe { std::env::remove_var("RIPPLE_API_KEY") };
    }
}

fn server_with(definition: &str, api_key: Option<&str>) -> (TestServer, TestGuard) {
    let guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under ENV_MUTEX, so no concurrent env access.
    unsafe {
        match api_key {
            Some(key) => std::env::set_var("RIPPLE_API_KEY", key),
            None => std::env::remove_var("RIPPLE_API_KEY"),
        }
    }
    let driver = PipelineConfig::from_toml(definition)
        .unwrap()
        .build_driver()
        .unwrap();
    let router = create_router(AppState::new(driver, RootInputs::new()));
    (TestServer::new(router).unwrap(), TestGuard { _guard: guard })
}

fn test_server() -> (TestServer, TestGuard) {
    server_with(PIPELINE, None)
}

async fn set_inputs(server: &TestServer, inputs: serde_json::Value) -> InputsResponse {
    let response = server.post("/inputs").json(&json!({ "inputs": inputs })).await;
    response.assert_status_ok();
    response.json()
}

async fn generate(server: &TestServer) -> GenerationResponse {
    let response = server.post("/generations").json(&json!({})).await;
    response.assert_status_ok();
    response.json()
}

async fn outputs(server: &TestServer) -> Vec<HostOutput> {
    let response: OutputsResponse = server.get("/outputs").await.json();
    response.outputs
}

// =============================================================================
// HEALTH / STATUS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _guard) = test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_before_first_generation() {
    let (server, _guard) = test_server();
    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.generation, None);
    assert_eq!(status.input_count, 0);
    assert!(status.pending);
    assert_eq!(status.stages.first().map(String::as_str), Some("roots"));
    assert!(status.stages.iter().any(|s| s == "out"));
    let upper = status.stages.iter().position(|s| s == "upper").unwrap();
    let out = status.stages.iter().position(|s| s == "out").unwrap();
    assert!(upper < out);
}

// =============================================================================
// INPUTS
// =============================================================================

#[tokio::test]
async fn test_set_inputs() {
    let (server, _guard) = test_server();
    let result = set_inputs(&server, json!({ "a.txt": "hello", "b.txt": "world" })).await;
    assert!(result.success);
    assert_eq!(result.changed, 2);
    assert_eq!(result.input_count, 2);

    let again = set_inputs(&server, json!({ "a.txt": "hello" })).await;
    assert_eq!(again.changed, 0);
    assert_eq!(again.input_version, result.input_version);
}

#[tokio::test]
async fn test_invalid_input_changes_nothing() {
    let (server, _guard) = test_server();
    set_inputs(&server, json!({ "a.txt": "hello" })).await;

    let response = server
        .post("/inputs")
        .json(&json!({ "inputs": { "": "no key", "b.txt": "ok" } }))
        .await;
    response.assert_status_bad_request();
    let result: InputsResponse = response.json();
    assert!(!result.success);
    assert!(result.error.is_some());

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.input_count, 1);
}

#[tokio::test]
async fn test_remove_inputs() {
    let (server, _guard) = test_server();
    set_inputs(&server, json!({ "a.txt": "hello", "b.txt": "world" })).await;
    generate(&server).await;

    let response = server
        .post("/inputs/remove")
        .json(&json!({ "keys": ["b.txt", "missing"] }))
        .await;
    response.assert_status_ok();
    let result: InputsResponse = response.json();
    assert_eq!(result.changed, 1);
    assert_eq!(result.input_count, 1);

    let report = generate(&server).await.report.unwrap();
    let upper = report.stage("upper").unwrap();
    assert_eq!(upper.removed, 1);
    assert_eq!(upper.cached, 1);
    assert!(!outputs(&server).await.iter().any(|o| o.key == "b.txt"));
}

// =============================================================================
// GENERATIONS
// =============================================================================

#[tokio::test]
async fn test_first_generation_outputs() {
    let (server, _guard) = test_server();
    set_inputs(&server, json!({ "a.txt": "hello" })).await;

    let result = generate(&server).await;
    assert!(result.success);
    assert!(!result.cancelled);
    let report = result.report.unwrap();
    assert_eq!(report.generation, 0);
    assert_eq!(report.input_diff.added, vec!["a.txt".to_string()]);

    let outputs = outputs(&server).await;
    assert!(outputs.contains(&HostOutput::new("a.txt", "HELLO")));
    assert!(outputs.contains(&HostOutput::new("version", "1")));

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.generation, Some(0));
    assert!(!status.pending);
}

#[tokio::test]
async fn test_unchanged_generation_skips_every_stage() {
    let (server, _guard) = test_server();
    set_inputs(&server, json!({ "a.txt": "hello" })).await;
    generate(&server).await;
    let before = outputs(&server).await;

    let report = generate(&server).await.report.unwrap();
    assert_eq!(report.generation, 1);
    assert_eq!(report.evaluated_stages(), 0);
    assert_eq!(outputs(&server).await, before);
}

#[tokio::test]
async fn test_edit_reuses_unaffected_entries() {
    let (server, _guard) = test_server();
    set_inputs(&server, json!({ "a.txt": "hello", "b.txt": "world" })).await;
    generate(&server).await;

    set_inputs(&server, json!({ "a.txt": "hi" })).await;
    let report = generate(&server).await.report.unwrap();
    let upper = report.stage("upper").unwrap();
    assert!(!upper.skipped);
    assert_eq!(upper.invocations, 1);
    assert_eq!(upper.modified, 1);
    assert_eq!(upper.cached, 1);
    assert!(report.stage("version").unwrap().skipped);

    let outputs = outputs(&server).await;
    assert!(outputs.contains(&HostOutput::new("a.txt", "HI")));
    assert!(outputs.contains(&HostOutput::new("b.txt", "WORLD")));
}

#[tokio::test]
async fn test_aborted_generation_keeps_previous_outputs() {
    let definition = format!("[driver]\nmax_table_entries = 1\n{}", PIPELINE);
    let (server, _guard) = server_with(&definition, None);
    set_inputs(&server, json!({ "a.txt": "hello" })).await;
    generate(&server).await;

    set_inputs(&server, json!({ "b.txt": "world" })).await;
    let response = server.post("/generations").json(&json!({})).await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let result: GenerationResponse = response.json();
    assert!(!result.success);
    assert!(!result.cancelled);
    assert!(result.error.unwrap().contains("table limit"));

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.generation, Some(0));
    assert!(status.pending);
    assert!(outputs(&server).await.contains(&HostOutput::new("a.txt", "HELLO")));
}

// =============================================================================
// DIAGNOSTICS / REPORT
// =============================================================================

#[tokio::test]
async fn test_faults_and_reported_diagnostics() {
    let (server, _guard) = test_server();
    set_inputs(&server, json!({ "x.txt": "boom", "y.txt": "TODO: fix" })).await;
    generate(&server).await;

    let response: DiagnosticsResponse = server.get("/diagnostics").await.json();
    assert_eq!(response.generation, Some(0));

    let fault = response
        .diagnostics
        .iter()
        .find(|d| d.kind == DiagnosticKind::TransformFault)
        .unwrap();
    assert_eq!(fault.stage, "guard");
    assert_eq!(fault.roots, vec!["x.txt".to_string()]);

    let reported = response
        .diagnostics
        .iter()
        .find(|d| d.kind == DiagnosticKind::Reported)
        .unwrap();
    assert_eq!(reported.stage, "todo");
    assert_eq!(reported.severity, Severity::Warning);
    assert_eq!(reported.roots, vec!["y.txt".to_string()]);

    // The faulted entry costs nothing else.
    assert!(outputs(&server).await.contains(&HostOutput::new("x.txt", "BOOM")));
}

#[tokio::test]
async fn test_report_not_found_before_generation() {
    let (server, _guard) = test_server();
    let response = server.get("/report").await;
    response.assert_status_not_found();
    let report: ReportResponse = response.json();
    assert!(report.report.is_none());
}

#[tokio::test]
async fn test_report_after_generation() {
    let (server, _guard) = test_server();
    set_inputs(&server, json!({ "a.txt": "hello" })).await;
    generate(&server).await;

    let response = server.get("/report").await;
    response.assert_status_ok();
    let report: ReportResponse = response.json();
    let report = report.report.unwrap();
    assert_eq!(report.generation, 0);
    assert!(report.stage("out").is_some());
}

// =============================================================================
// EXPORT / HASH
// =============================================================================

#[tokio::test]
async fn test_export_requires_generation() {
    let (server, _guard) = test_server();
    let response = server.post("/export").await;
    response.assert_status_not_found();
    let export: ExportResponse = response.json();
    assert!(!export.success);
}

#[tokio::test]
async fn test_export_decodes_to_valid_snapshot() {
    let (server, _guard) = test_server();
    set_inputs(&server, json!({ "a.txt": "hello" })).await;
    generate(&server).await;

    let export: ExportResponse = server.post("/export").await.json();
    assert!(export.success);
    let bytes = base64::Engine::decode(
        &base64::engine::general_purpose::STANDARD,
        export.data.unwrap(),
    )
    .unwrap();
    let snapshot = import_snapshot(&bytes).unwrap();
    assert_eq!(Some(snapshot.checksum()), export.checksum);
    assert!(snapshot.host_outputs.contains(&HostOutput::new("a.txt", "HELLO")));
}

#[tokio::test]
async fn test_hash_changes_with_content() {
    let (server, _guard) = test_server();
    set_inputs(&server, json!({ "a.txt": "hello" })).await;
    generate(&server).await;
    let first: HashResponse = server.get("/hash").await.json();
    assert!(first.success);
    assert_eq!(first.algorithm, "blake3");
    let first_hash = first.hash.unwrap();
    assert_eq!(first_hash.len(), 64);
    assert!(first_hash.chars().all(|c| c.is_ascii_hexdigit()));

    set_inputs(&server, json!({ "a.txt": "bye" })).await;
    generate(&server).await;
    let second: HashResponse = server.get("/hash").await.json();
    assert_ne!(second.hash.unwrap(), first_hash);
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

#[tokio::test]
async fn test_auth_missing_header_is_rejected() {
    let (server, _guard) = server_with(PIPELINE, Some("test-secret"));
    let response = server.get("/status").await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_wrong_key_is_rejected() {
    let (server, _guard) = server_with(PIPELINE, Some("test-secret"));
    let response = server
        .get("/outputs")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_valid_bearer_token() {
    let (server, _guard) = server_with(PIPELINE, Some("test-secret"));
    let response = server
        .get("/status")
        .add_header(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer test-secret"),
        )
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_health_is_public() {
    let (server, _guard) = server_with(PIPELINE, Some("test-secret"));
    server.get("/health").await.assert_status_ok();
}
