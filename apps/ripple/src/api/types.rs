//! # API Request/Response Types
//!
//! JSON structures of the HTTP API.

use ripple_core::{Diagnostic, GenerationReport, HostOutput, PipelineError, RootInputs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum number of keys in one `POST /inputs` or `POST /inputs/remove`.
pub const MAX_KEYS_PER_REQUEST: usize = 10_000;

/// Longest accepted generation timeout (10 minutes).
pub const MAX_GENERATION_TIMEOUT_MS: u64 = 10 * 60 * 1000;

// =============================================================================
// HEALTH / STATUS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Pipeline shape and progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Stage names in evaluation order.
    pub stages: Vec<String>,
    pub levels: usize,
    /// Last completed generation, if any.
    pub generation: Option<u64>,
    pub input_count: usize,
    pub input_version: u64,
    /// The inputs differ from the ones the last generation saw.
    pub pending: bool,
}

// =============================================================================
// INPUTS
// =============================================================================

/// Set (insert or replace) root inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetInputsRequest {
    pub inputs: BTreeMap<String, String>,
}

impl SetInputsRequest {
    /// Apply to a copy of `current`; nothing changes unless every pair is valid.
    ///
    /// Returns the new inputs and how many pairs changed.
    pub fn apply(&self, current: &RootInputs) -> Result<(RootInputs, usize), PipelineError> {
        if self.inputs.len() > MAX_KEYS_PER_REQUEST {
            return Err(PipelineError::InvalidInput(format!(
                "{} inputs in one request, maximum is {}",
                self.inputs.len(),
                MAX_KEYS_PER_REQUEST
            )));
        }
        let mut next = current.clone();
        let mut changed = 0;
        for (key, value) in &self.inputs {
            if next.insert(key.as_str(), value.as_str())? {
                changed += 1;
            }
        }
        Ok((next, changed))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoveInputsRequest {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputsResponse {
    pub success: bool,
    pub changed: usize,
    pub input_count: usize,
    pub input_version: u64,
    pub error: Option<String>,
}

impl InputsResponse {
    pub fn success(changed: usize, inputs: &RootInputs) -> Self {
        Self {
            success: true,
            changed,
            input_count: inputs.len(),
            input_version: inputs.version(),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            changed: 0,
            input_count: 0,
            input_version: 0,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// GENERATIONS
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationRequest {
    /// Cancel the generation if it runs longer than this.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub success: bool,
    /// The generation was cancelled and nothing was committed.
    pub cancelled: bool,
    pub report: Option<GenerationReport>,
    pub error: Option<String>,
}

impl GenerationResponse {
    pub fn completed(report: GenerationReport) -> Self {
        Self {
            success: true,
            cancelled: false,
            report: Some(report),
            error: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            success: false,
            cancelled: true,
            report: None,
            error: Some("generation cancelled; previous outputs remain visible".to_string()),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            cancelled: false,
            report: None,
            error: Some(msg.into()),
        }
    }
}

// =============================================================================
// OUTPUTS
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputsResponse {
    pub generation: Option<u64>,
    pub outputs: Vec<HostOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsResponse {
    pub generation: Option<u64>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    pub report: Option<GenerationReport>,
    pub error: Option<String>,
}

// =============================================================================
// EXPORT / HASH
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportResponse {
    pub success: bool,
    pub data: Option<String>, // Base64 encoded
    pub checksum: Option<u64>,
    pub error: Option<String>,
}

impl ExportResponse {
    pub fn success(data: &[u8], checksum: u64) -> Self {
        Self {
            success: true,
            data: Some(base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                data,
            )),
            checksum: Some(checksum),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            checksum: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashResponse {
    pub success: bool,
    pub generation: Option<u64>,
    pub algorithm: String,
    pub hash: Option<String>,
    pub checksum: Option<u64>,
    pub error: Option<String>,
}
