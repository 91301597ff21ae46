//! # Authentication
//!
//! Optional API key authentication. When `RIPPLE_API_KEY` is set, every
//! request except `GET /health` must carry `Authorization: Bearer <key>`
//! (a bare `<key>` is accepted too).

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

/// Paths reachable without a key.
const PUBLIC_PATHS: &[&str] = &["/health"];

/// The configured API key, if authentication is enabled.
pub fn get_api_key_from_env() -> Option<String> {
    std::env::var("RIPPLE_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

/// Compare two keys in time independent of where they differ.
///
/// Both sides are zero-padded to the same length before the comparison so
/// the loop length does not depend on the provided key.
fn keys_match(provided: &[u8], expected: &[u8]) -> bool {
    let len = provided.len().max(expected.len());
    let mut a = vec![0u8; len];
    let mut b = vec![0u8; len];
    a[..provided.len()].copy_from_slice(provided);
    b[..expected.len()].copy_from_slice(expected);
    let same_bytes: bool = a.ct_eq(&b).into();
    same_bytes && provided.len() == expected.len()
}

/// Reject requests without the configured key.
pub async fn api_key_auth_middleware(
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    let Some(expected) = get_api_key_from_env() else {
        return Ok(next.run(request).await);
    };
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v));

    match provided {
        Some(key) if keys_match(key.as_bytes(), expected.as_bytes()) => {
            Ok(next.run(request).await)
        }
        Some(_) => {
            tracing::warn!(event = "auth_failure", reason = "invalid_api_key", "Rejected request");
            Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
        None => {
            tracing::warn!(
                event = "auth_failure",
                reason = "missing_authorization_header",
                "Rejected request"
            );
            Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
        }
    }
}
