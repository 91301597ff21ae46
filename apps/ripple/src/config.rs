//! # Pipeline Definitions
//!
//! A pipeline is described in TOML:
//!
//! ```toml
//! [driver]
//! parallel = true
//! max_table_entries = 100000
//! disabled_outputs = ["diagnostic_output"]
//!
//! [[stage]]
//! name = "words"
//! op = "words"
//! input = "roots"
//!
//! [[stage]]
//! name = "out"
//! op = "host"
//! input = "words"
//! ```
//!
//! Root inputs come either from a directory (one input per regular file,
//! keyed by its path relative to the directory) or from a JSON object of
//! string pairs.

use crate::catalog::{self, Op};
use ripple_core::{Driver, DriverOptions, Pipeline, PipelineError, RootInputs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a pipeline definition (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Maximum size of a JSON input file or replay script (100 MB).
pub const MAX_INPUT_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Read a file after checking its size.
pub fn read_bounded(path: &Path, max_size: u64) -> Result<String, PipelineError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        PipelineError::IoError(format!("Cannot read '{}': {}", path.display(), e))
    })?;
    if metadata.len() > max_size {
        return Err(PipelineError::IoError(format!(
            "File '{}' is {} bytes, maximum allowed is {} bytes",
            path.display(),
            metadata.len(),
            max_size
        )));
    }
    std::fs::read_to_string(path)
        .map_err(|e| PipelineError::IoError(format!("Cannot read '{}': {}", path.display(), e)))
}

// =============================================================================
// PIPELINE CONFIG
// =============================================================================

/// One `[[stage]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub name: String,
    pub op: Op,
    /// Upstream stage name, or `roots`.
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub arg: Option<String>,
    #[serde(default)]
    pub always_run: bool,
}

/// A parsed `ripple.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub driver: DriverOptions,
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    /// Parse a definition from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, PipelineError> {
        let config: Self =
            toml::from_str(text).map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        if config.driver.max_table_entries == 0 {
            return Err(PipelineError::InvalidConfig(
                "driver.max_table_entries must be positive".to_string(),
            ));
        }
        if let Some(kind) = config.driver.disabled_outputs.iter().find(|k| !k.is_sink()) {
            return Err(PipelineError::InvalidConfig(format!(
                "driver.disabled_outputs: {:?} is not an output kind",
                kind
            )));
        }
        Ok(config)
    }

    /// Load a definition file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = read_bounded(path, MAX_CONFIG_FILE_SIZE)?;
        let config = Self::from_toml(&text)?;
        tracing::info!(
            path = %path.display(),
            stages = config.stages.len(),
            "Pipeline definition loaded"
        );
        Ok(config)
    }

    /// Names of the sink stages, in definition order.
    pub fn sinks(&self) -> impl Iterator<Item = &str> {
        self.stages
            .iter()
            .filter(|s| s.op.is_sink())
            .map(|s| s.name.as_str())
    }

    pub fn build_pipeline(&self) -> Result<Pipeline, PipelineError> {
        catalog::build_pipeline(&self.stages)
    }

    /// Build the pipeline and wrap it in a driver with the configured options.
    pub fn build_driver(&self) -> Result<Driver, PipelineError> {
        Ok(Driver::with_options(
            self.build_pipeline()?,
            self.driver.clone(),
        ))
    }
}

// =============================================================================
// ROOT INPUTS
// =============================================================================

/// Load root inputs from a directory or a JSON file.
pub fn load_inputs(path: &Path) -> Result<RootInputs, PipelineError> {
    let canonical = path.canonicalize().map_err(|e| {
        PipelineError::IoError(format!("Invalid input path '{}': {}", path.display(), e))
    })?;

    if canonical.is_dir() {
        let mut files = Vec::new();
        collect_files(&canonical, &mut files)?;
        files.sort();
        let mut inputs = RootInputs::new();
        for file in files {
            let key = relative_key(&canonical, &file);
            let text = read_bounded(&file, MAX_INPUT_FILE_SIZE)?;
            inputs.insert(key, text)?;
        }
        tracing::debug!(dir = %canonical.display(), inputs = inputs.len(), "Inputs loaded");
        Ok(inputs)
    } else {
        let text = read_bounded(&canonical, MAX_INPUT_FILE_SIZE)?;
        parse_inputs_json(&text)
    }
}

/// Parse a JSON object of string pairs.
pub fn parse_inputs_json(text: &str) -> Result<RootInputs, PipelineError> {
    let pairs: BTreeMap<String, String> = serde_json::from_str(text)
        .map_err(|e| PipelineError::SerializationError(format!("Inputs: {}", e)))?;
    RootInputs::from_pairs(pairs)
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), PipelineError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| PipelineError::IoError(format!("Cannot list '{}': {}", dir.display(), e)))?;
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::IoError(e.to_string()))?;
        let file_type = entry
            .file_type()
            .map_err(|e| PipelineError::IoError(e.to_string()))?;
        // Symlinks are skipped so a link cannot escape the input directory.
        if file_type.is_dir() {
            collect_files(&entry.path(), files)?;
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }
    Ok(())
}

fn relative_key(base: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(base).unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::StageKind;

    #[test]
    fn empty_definition_has_defaults() {
        let config = PipelineConfig::from_toml("").expect("parse");
        assert_eq!(config.driver, DriverOptions::default());
        assert!(config.stages.is_empty());
    }

    #[test]
    fn parses_stages_and_driver() {
        let config = PipelineConfig::from_toml(
            r#"
            [driver]
            parallel = false

            [[stage]]
            name = "up"
            op = "upper"
            input = "roots"
            always_run = true

            [[stage]]
            name = "banner"
            op = "constant"
            arg = "v1"
            "#,
        )
        .expect("parse");
        assert!(!config.driver.parallel);
        assert_eq!(config.stages.len(), 2);
        assert_eq!(config.stages[0].op, Op::Upper);
        assert!(config.stages[0].always_run);
        assert_eq!(config.sinks().collect::<Vec<_>>(), vec!["banner"]);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = PipelineConfig::from_toml("[[stage]]\nname = \"a\"\nop = \"upper\"\nfoo = 1\n");
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn unknown_op_is_rejected() {
        let result = PipelineConfig::from_toml("[[stage]]\nname = \"a\"\nop = \"explode\"\n");
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn zero_table_limit_is_rejected() {
        let result = PipelineConfig::from_toml("[driver]\nmax_table_entries = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn disabled_outputs_accept_sink_kinds_only() {
        let config = PipelineConfig::from_toml(
            "[driver]\ndisabled_outputs = [\"host_output\", \"post_init\"]\n",
        )
        .expect("parse");
        assert!(!config.driver.output_enabled(StageKind::HostOutput));
        assert!(!config.driver.output_enabled(StageKind::PostInit));
        assert!(config.driver.output_enabled(StageKind::DiagnosticOutput));

        let result = PipelineConfig::from_toml("[driver]\ndisabled_outputs = [\"transform\"]\n");
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
        let result = PipelineConfig::from_toml("[driver]\ndisabled_outputs = [\"source_text\"]\n");
        assert!(result.is_err());
    }

    #[test]
    fn json_inputs() {
        let inputs = parse_inputs_json(r#"{"b.txt": "two", "a.txt": "one"}"#).expect("parse");
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs.get("a.txt"), Some("one"));
        assert!(parse_inputs_json("[1, 2]").is_err());
        assert!(parse_inputs_json(r#"{"": "empty key"}"#).is_err());
    }
}
