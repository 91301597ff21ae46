//! # API Endpoint Handlers

use super::{
    AppState,
    types::{
        DiagnosticsResponse, ExportResponse, GenerationRequest, GenerationResponse, HashResponse,
        HealthResponse, InputsResponse, MAX_GENERATION_TIMEOUT_MS, MAX_KEYS_PER_REQUEST,
        OutputsResponse, RemoveInputsRequest, ReportResponse, SetInputsRequest, StatusResponse,
    },
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use ripple_core::{
    CancellationToken, GenerationOutcome,
    export::{export_snapshot, snapshot_checksum, snapshot_crypto_hash},
};
use std::time::Duration;

// =============================================================================
// HEALTH / STATUS
// =============================================================================

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

pub async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let workspace = state.workspace.read().await;
    let pipeline = workspace.driver.pipeline();
    let stages = pipeline
        .topological_order()
        .filter_map(|id| pipeline.stage_name(id).map(str::to_string))
        .collect();
    let pending = workspace
        .driver
        .committed_roots()
        .is_none_or(|committed| !committed.same_contents(&workspace.inputs));

    Json(StatusResponse {
        stages,
        levels: pipeline.levels().len(),
        generation: workspace.driver.generation(),
        input_count: workspace.inputs.len(),
        input_version: workspace.inputs.version(),
        pending,
    })
}

// =============================================================================
// INPUTS
// =============================================================================

pub async fn set_inputs_handler(
    State(state): State<AppState>,
    Json(request): Json<SetInputsRequest>,
) -> impl IntoResponse {
    let mut workspace = state.workspace.write().await;
    match request.apply(&workspace.inputs) {
        Ok((inputs, changed)) => {
            workspace.inputs = inputs;
            tracing::debug!(changed, version = workspace.inputs.version(), "Inputs set");
            (
                StatusCode::OK,
                Json(InputsResponse::success(changed, &workspace.inputs)),
            )
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(InputsResponse::error(e.to_string())),
        ),
    }
}

pub async fn remove_inputs_handler(
    State(state): State<AppState>,
    Json(request): Json<RemoveInputsRequest>,
) -> impl IntoResponse {
    if request.keys.len() > MAX_KEYS_PER_REQUEST {
        return (
            StatusCode::BAD_REQUEST,
            Json(InputsResponse::error(format!(
                "{} keys in one request, maximum is {}",
                request.keys.len(),
                MAX_KEYS_PER_REQUEST
            ))),
        );
    }
    let mut workspace = state.workspace.write().await;
    let mut changed = 0;
    for key in &request.keys {
        if workspace.inputs.remove(key.as_str()).is_some() {
            changed += 1;
        }
    }
    tracing::debug!(changed, version = workspace.inputs.version(), "Inputs removed");
    (
        StatusCode::OK,
        Json(InputsResponse::success(changed, &workspace.inputs)),
    )
}

// =============================================================================
// GENERATIONS
// =============================================================================

/// Run one generation on the blocking pool.
///
/// The workspace stays write-locked for the whole run, so generations are
/// serialized and readers see either the previous or the new generation.
/// `409 Conflict` means nothing was committed.
pub async fn generation_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerationRequest>,
) -> impl IntoResponse {
    let token = CancellationToken::new();
    let watchdog = request.timeout_ms.map(|ms| {
        let token = token.clone();
        let timeout = Duration::from_millis(ms.min(MAX_GENERATION_TIMEOUT_MS));
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::info!(timeout_ms = ms, "Generation timed out, cancelling");
            token.cancel();
        })
    });

    let mut guard = state.workspace.clone().write_owned().await;
    let result = tokio::task::spawn_blocking(move || {
        let workspace = &mut *guard;
        workspace.driver.run_generation(&workspace.inputs, &token)
    })
    .await;

    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }

    match result {
        Ok(Ok(GenerationOutcome::Completed(report))) => {
            (StatusCode::OK, Json(GenerationResponse::completed(report)))
        }
        Ok(Ok(GenerationOutcome::Cancelled)) => {
            (StatusCode::CONFLICT, Json(GenerationResponse::cancelled()))
        }
        Ok(Err(e)) => (StatusCode::CONFLICT, Json(GenerationResponse::error(e.to_string()))),
        Err(e) => {
            tracing::error!("Generation task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(GenerationResponse::error("generation task failed")),
            )
        }
    }
}

// =============================================================================
// OUTPUTS
// =============================================================================

pub async fn outputs_handler(State(state): State<AppState>) -> impl IntoResponse {
    let workspace = state.workspace.read().await;
    Json(OutputsResponse {
        generation: workspace.driver.generation(),
        outputs: workspace.driver.outputs().host_outputs.clone(),
    })
}

pub async fn diagnostics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let workspace = state.workspace.read().await;
    Json(DiagnosticsResponse {
        generation: workspace.driver.generation(),
        diagnostics: workspace.driver.outputs().diagnostics.clone(),
    })
}

pub async fn report_handler(State(state): State<AppState>) -> impl IntoResponse {
    let workspace = state.workspace.read().await;
    match workspace.driver.last_report() {
        Some(report) => (
            StatusCode::OK,
            Json(ReportResponse {
                report: Some(report.clone()),
                error: None,
            }),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(ReportResponse {
                report: None,
                error: Some("no completed generation".to_string()),
            }),
        ),
    }
}

// =============================================================================
// EXPORT / HASH
// =============================================================================

pub async fn export_handler(State(state): State<AppState>) -> impl IntoResponse {
    let workspace = state.workspace.read().await;
    let exported = export_snapshot(&workspace.driver)
        .map(|data| (data, snapshot_checksum(&workspace.driver).unwrap_or_default()));
    match exported {
        Ok((data, checksum)) => (StatusCode::OK, Json(ExportResponse::success(&data, checksum))),
        Err(e) => (StatusCode::NOT_FOUND, Json(ExportResponse::error(e.to_string()))),
    }
}

pub async fn hash_handler(State(state): State<AppState>) -> impl IntoResponse {
    let workspace = state.workspace.read().await;
    let driver = &workspace.driver;
    match snapshot_crypto_hash(driver) {
        Ok(hash) => (
            StatusCode::OK,
            Json(HashResponse {
                success: true,
                generation: driver.generation(),
                algorithm: "blake3".to_string(),
                hash: Some(hash),
                checksum: snapshot_checksum(driver),
                error: None,
            }),
        ),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(HashResponse {
                success: false,
                generation: None,
                algorithm: "blake3".to_string(),
                hash: None,
                checksum: None,
                error: Some(e.to_string()),
            }),
        ),
    }
}
