//! # Replay Scripts
//!
//! A replay script is a JSON array of steps. Each step edits the current
//! root inputs and then runs one generation:
//!
//! ```json
//! [
//!   { "inputs": { "a.txt": "hello", "b.txt": "world" } },
//!   { "set": { "a.txt": "hello again" } },
//!   { "remove": ["b.txt"] }
//! ]
//! ```
//!
//! `inputs` replaces the whole set; `set` and `remove` patch it. A step may
//! combine them; they apply in that order.

use ripple_core::{PipelineError, RootInputs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum number of steps in one script.
pub const MAX_REPLAY_STEPS: usize = 10_000;

/// One step of a replay script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayStep {
    #[serde(default)]
    pub inputs: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub set: BTreeMap<String, String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

impl ReplayStep {
    /// Apply this step to the current inputs.
    ///
    /// Returns whether the inputs changed.
    pub fn apply(&self, inputs: &mut RootInputs) -> Result<bool, PipelineError> {
        let before = inputs.version();

        if let Some(replacement) = &self.inputs {
            let stale: Vec<String> = inputs
                .iter()
                .filter(|(key, _)| !replacement.contains_key(*key))
                .map(|(key, _)| key.to_string())
                .collect();
            for key in stale {
                inputs.remove(&key);
            }
            for (key, value) in replacement {
                inputs.insert(key.as_str(), value.as_str())?;
            }
        }
        for (key, value) in &self.set {
            inputs.insert(key.as_str(), value.as_str())?;
        }
        for key in &self.remove {
            inputs.remove(key);
        }

        Ok(inputs.version() != before)
    }
}

/// Parse a replay script.
pub fn parse_script(text: &str) -> Result<Vec<ReplayStep>, PipelineError> {
    let steps: Vec<ReplayStep> = serde_json::from_str(text)
        .map_err(|e| PipelineError::SerializationError(format!("Replay script: {}", e)))?;
    if steps.len() > MAX_REPLAY_STEPS {
        return Err(PipelineError::InvalidConfig(format!(
            "Replay script has {} steps, maximum is {}",
            steps.len(),
            MAX_REPLAY_STEPS
        )));
    }
    Ok(steps)
}
