//! Unit tests for API request/response types.

#![allow(clippy::unwrap_used, clippy::panic)]

use base64::Engine;
use ripple::api::{
    ExportResponse, GenerationRequest, GenerationResponse, HealthResponse, InputsResponse,
    RemoveInputsRequest, SetInputsRequest, StatusResponse,
};
use ripple_core::RootInputs;

// =============================================================================
// HEALTH / STATUS
// =============================================================================

#[test]
fn test_health_response_default() {
    let health = HealthResponse::default();
    assert_eq!(health.status, "ok");
    assert!(!health.version.is_empty());
}

#[test]
fn test_status_response_serialization() {
    let status = StatusResponse {
        stages: vec!["roots".to_string(), "out".to_string()],
        levels: 2,
        generation: None,
        input_count: 0,
        input_version: 0,
        pending: true,
    };
    let json = serde_json::to_string(&status).unwrap();
    assert!(json.contains("\"stages\":[\"roots\",\"out\"]"));
    assert!(json.contains("\"generation\":null"));
    assert!(json.contains("\"pending\":true"));
}

// =============================================================================
// INPUTS
// =============================================================================

#[test]
fn test_set_inputs_counts_only_changes() {
    let current = RootInputs::from_pairs([("a", "1"), ("b", "2")]).unwrap();
    let request: SetInputsRequest =
        serde_json::from_str(r#"{"inputs": {"a": "1", "b": "20", "c": "3"}}"#).unwrap();

    let (next, changed) = request.apply(&current).unwrap();
    assert_eq!(changed, 2);
    assert_eq!(next.get("b"), Some("20"));
    assert_eq!(next.len(), 3);
    // The original is untouched.
    assert_eq!(current.get("b"), Some("2"));
}

#[test]
fn test_set_inputs_is_all_or_nothing() {
    let current = RootInputs::from_pairs([("a", "1")]).unwrap();
    let request: SetInputsRequest =
        serde_json::from_str(r#"{"inputs": {"": "bad", "z": "ok"}}"#).unwrap();

    assert!(request.apply(&current).is_err());
    assert_eq!(current.len(), 1);
    assert_eq!(current.get("z"), None);
}

#[test]
fn test_remove_inputs_deserialization() {
    let request: RemoveInputsRequest = serde_json::from_str(r#"{"keys": ["a", "b"]}"#).unwrap();
    assert_eq!(request.keys, vec!["a", "b"]);
}

#[test]
fn test_inputs_response_error() {
    let response = InputsResponse::error("nope");
    assert!(!response.success);
    assert_eq!(response.changed, 0);
    assert_eq!(response.error.as_deref(), Some("nope"));
}

// =============================================================================
// GENERATIONS
// =============================================================================

#[test]
fn test_generation_request_defaults() {
    let request: GenerationRequest = serde_json::from_str("{}").unwrap();
    assert_eq!(request.timeout_ms, None);

    let request: GenerationRequest = serde_json::from_str(r#"{"timeout_ms": 250}"#).unwrap();
    assert_eq!(request.timeout_ms, Some(250));
}

#[test]
fn test_generation_response_cancelled() {
    let response = GenerationResponse::cancelled();
    assert!(!response.success);
    assert!(response.cancelled);
    assert!(response.report.is_none());
    assert!(response.error.is_some());
}

// =============================================================================
// EXPORT
// =============================================================================

#[test]
fn test_export_response_encodes_base64() {
    let response = ExportResponse::success(b"RPLX", 42);
    assert!(response.success);
    assert_eq!(response.checksum, Some(42));

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(response.data.unwrap())
        .unwrap();
    assert_eq!(decoded, b"RPLX");
}

#[test]
fn test_export_response_error() {
    let response = ExportResponse::error("no completed generation");
    assert!(!response.success);
    assert!(response.data.is_none());
    assert!(response.checksum.is_none());
}
