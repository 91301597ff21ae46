//! # Ripple HTTP API Module
//!
//! This module implements the HTTP REST API server using axum. The server
//! owns one live [`Driver`] and the root inputs it is fed with; clients edit
//! the inputs and then ask for a generation.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Pipeline and generation status
//! - `POST /inputs` - Set root inputs
//! - `POST /inputs/remove` - Remove root inputs
//! - `POST /generations` - Run one generation
//! - `GET /outputs` - Host outputs of the last completed generation
//! - `GET /diagnostics` - Diagnostics of the last completed generation
//! - `GET /report` - Full report of the last completed generation
//! - `POST /export` - Canonical snapshot of the last completed generation
//! - `GET /hash` - BLAKE3 hash of that snapshot
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `RIPPLE_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `RIPPLE_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `RIPPLE_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::get_api_key_from_env;
pub use middleware::{create_rate_limiter, get_rate_limit_from_env};
pub use handlers::{
    diagnostics_handler, export_handler, generation_handler, hash_handler, health_handler,
    outputs_handler, remove_inputs_handler, report_handler, set_inputs_handler, status_handler,
};
pub use types::{
    DiagnosticsResponse, ExportResponse, GenerationRequest, GenerationResponse, HashResponse,
    HealthResponse, InputsResponse, OutputsResponse, RemoveInputsRequest, ReportResponse,
    SetInputsRequest, StatusResponse,
};

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use ripple_core::{Driver, PipelineError, RootInputs};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// The driver together with the inputs it will see on the next generation.
pub struct Workspace {
    pub driver: Driver,
    pub inputs: RootInputs,
}

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub workspace: Arc<RwLock<Workspace>>,
}

impl AppState {
    #[must_use]
    pub fn new(driver: Driver, inputs: RootInputs) -> Self {
        Self {
            workspace: Arc::new(RwLock::new(Workspace { driver, inputs })),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build CORS layer from `RIPPLE_CORS_ORIGINS`.
///
/// - Not set: localhost only
/// - `*`: any origin
/// - Otherwise: the listed origins
fn build_cors_layer() -> CorsLayer {
    match std::env::var("RIPPLE_CORS_ORIGINS").ok() {
        Some(origins) if origins.trim() == "*" => {
            tracing::warn!("CORS: Allowing all origins (RIPPLE_CORS_ORIGINS=*)");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        return None;
                    }
                    match trimmed.parse::<HeaderValue>() {
                        Ok(value) => Some(value),
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in RIPPLE_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => {
            tracing::info!("CORS: No RIPPLE_CORS_ORIGINS set, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Rate Limiting - if enabled
/// 4. Authentication - if an API key is configured
pub fn create_router(state: AppState) -> Router {
    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - all endpoints are publicly accessible! \
             Set RIPPLE_API_KEY to enable authentication."
        );
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/inputs", post(handlers::set_inputs_handler))
        .route("/inputs/remove", post(handlers::remove_inputs_handler))
        .route("/generations", post(handlers::generation_handler))
        .route("/outputs", get(handlers::outputs_handler))
        .route("/diagnostics", get(handlers::diagnostics_handler))
        .route("/report", get(handlers::report_handler))
        .route("/export", post(handlers::export_handler))
        .route("/hash", get(handlers::hash_handler));

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer())
                .layer(axum::extract::DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES)),
        )
        .with_state(state)
}

/// Largest accepted request body (32 MB).
const MAX_REQUEST_BODY_BYTES: usize = 32 * 1024 * 1024;

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server; returns after Ctrl+C.
pub async fn run_server(addr: &str, driver: Driver, inputs: RootInputs) -> Result<(), PipelineError> {
    let router = create_router(AppState::new(driver, inputs));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PipelineError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("Ripple HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("Shutting down"),
                Err(e) => {
                    tracing::error!("Cannot listen for shutdown signal: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
        .map_err(|e| PipelineError::IoError(format!("Server error: {}", e)))
}
