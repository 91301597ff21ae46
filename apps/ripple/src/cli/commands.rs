//! # CLI Command Implementations

use crate::api;
use crate::config::{self, PipelineConfig, read_bounded};
use crate::replay;
use ripple_core::{
    CancellationToken, Driver, GenerationOutcome, GenerationReport, PipelineError, RootInputs,
    export::{export_snapshot, import_snapshot, snapshot_checksum, snapshot_crypto_hash},
};
use std::path::{Path, PathBuf};

/// Maximum snapshot size accepted by `verify` (500 MB).
const MAX_SNAPSHOT_FILE_SIZE: u64 = 500 * 1024 * 1024;

/// How command results are printed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Output {
    pub json: bool,
    pub verbose: bool,
}

fn print_json(value: &impl serde::Serialize) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

/// Validate an output path: its parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, PipelineError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let canonical_parent = parent.canonicalize().map_err(|e| {
        PipelineError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;
    if !canonical_parent.is_dir() {
        return Err(PipelineError::IoError(format!(
            "Output directory '{}' is not a directory",
            parent.display()
        )));
    }
    let filename = path
        .file_name()
        .ok_or_else(|| PipelineError::IoError("Output path has no filename".to_string()))?;
    Ok(canonical_parent.join(filename))
}

fn load_driver(config_path: &Path) -> Result<Driver, PipelineError> {
    PipelineConfig::load(config_path)?.build_driver()
}

/// A token cancelled by Ctrl+C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let watcher = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling generation");
            watcher.cancel();
        }
    });
    token
}

/// Run one generation; `None` if it was interrupted.
fn run_once(
    driver: &mut Driver,
    inputs: &RootInputs,
    token: &CancellationToken,
) -> Result<Option<GenerationReport>, PipelineError> {
    match driver.run_generation(inputs, token)? {
        GenerationOutcome::Completed(report) => Ok(Some(report)),
        GenerationOutcome::Cancelled => {
            eprintln!("Generation cancelled; nothing was committed");
            Ok(None)
        }
    }
}

fn print_report(report: &GenerationReport, out: Output) {
    if out.json {
        print_json(report);
        return;
    }

    println!(
        "Generation {}: {}/{} stages evaluated, {} inputs changed, {}us",
        report.generation,
        report.evaluated_stages(),
        report.stages.len(),
        report.input_diff.len(),
        report.elapsed_micros
    );

    if out.verbose {
        println!();
        println!(
            "  {:<24} {:>8} {:>6} {:>6} {:>6} {:>6} {:>6}",
            "stage", "run", "added", "mod", "cached", "removed", "faults"
        );
        for stage in &report.stages {
            println!(
                "  {:<24} {:>8} {:>6} {:>6} {:>6} {:>6} {:>6}",
                stage.name,
                if stage.skipped { "skipped" } else { "ran" },
                stage.added,
                stage.modified,
                stage.cached,
                stage.removed,
                stage.faults
            );
        }
    }

    if !report.outputs.host_outputs.is_empty() {
        println!();
        println!("Outputs:");
        for output in &report.outputs.host_outputs {
            println!("  {} = {}", output.key, output.value);
        }
    }
    if !report.outputs.diagnostics.is_empty() {
        println!();
        println!("Diagnostics:");
        for diagnostic in &report.outputs.diagnostics {
            println!("  {}", diagnostic);
        }
    }
}

// =============================================================================
// CHECK COMMAND
// =============================================================================

/// Build the pipeline and print its stages in evaluation order.
pub fn cmd_check(config_path: &Path, out: Output) -> Result<(), PipelineError> {
    let config = PipelineConfig::load(config_path)?;
    let pipeline = config.build_pipeline()?;

    let stages: Vec<serde_json::Value> = pipeline
        .topological_order()
        .map(|id| {
            let upstreams: Vec<&str> = pipeline
                .upstreams(id)
                .iter()
                .filter_map(|u| pipeline.stage_name(*u))
                .collect();
            serde_json::json!({
                "name": pipeline.stage_name(id),
                "kind": pipeline.stage_kind(id),
                "upstreams": upstreams,
            })
        })
        .collect();

    if out.json {
        print_json(&serde_json::json!({
            "config": config_path.to_string_lossy(),
            "stages": stages,
            "levels": pipeline.levels().len(),
            "driver": config.driver,
        }));
        return Ok(());
    }

    println!("Pipeline: {}", config_path.display());
    println!(
        "{} stages in {} levels",
        pipeline.stage_count(),
        pipeline.levels().len()
    );
    println!();
    for stage in &stages {
        let upstreams: Vec<&str> = stage["upstreams"]
            .as_array()
            .map(|a| a.iter().filter_map(|u| u.as_str()).collect())
            .unwrap_or_default();
        println!(
            "  {:<24} {:<18} <- {}",
            stage["name"].as_str().unwrap_or_default(),
            stage["kind"].as_str().unwrap_or_default(),
            if upstreams.is_empty() {
                "-".to_string()
            } else {
                upstreams.join(", ")
            }
        );
    }
    Ok(())
}

// =============================================================================
// RUN / REPLAY COMMANDS
// =============================================================================

pub fn cmd_run(config_path: &Path, inputs_path: &Path, out: Output) -> Result<(), PipelineError> {
    let mut driver = load_driver(config_path)?;
    let inputs = config::load_inputs(inputs_path)?;
    tracing::info!(inputs = inputs.len(), "Running one generation");

    if let Some(report) = run_once(&mut driver, &inputs, &interrupt_token())? {
        print_report(&report, out);
    }
    Ok(())
}

/// Run every step of a replay script against one driver.
pub fn cmd_replay(config_path: &Path, script_path: &Path, out: Output) -> Result<(), PipelineError> {
    let mut driver = load_driver(config_path)?;
    let steps = replay::parse_script(&read_bounded(script_path, config::MAX_INPUT_FILE_SIZE)?)?;
    let token = interrupt_token();
    let mut inputs = RootInputs::new();

    for (index, step) in steps.iter().enumerate() {
        let changed = step.apply(&mut inputs)?;
        tracing::debug!(step = index, changed, "Replay step");
        let Some(report) = run_once(&mut driver, &inputs, &token)? else {
            break;
        };
        if out.json {
            // One JSON document per line.
            println!("{}", serde_json::to_string(&report).unwrap_or_default());
        } else {
            println!("--- step {} ---", index);
            print_report(&report, out);
            println!();
        }
    }
    Ok(())
}

// =============================================================================
// SNAPSHOT COMMANDS
// =============================================================================

pub fn cmd_snapshot(
    config_path: &Path,
    inputs_path: &Path,
    output: &Path,
    out: Output,
) -> Result<(), PipelineError> {
    let mut driver = load_driver(config_path)?;
    let inputs = config::load_inputs(inputs_path)?;
    if run_once(&mut driver, &inputs, &interrupt_token())?.is_none() {
        return Ok(());
    }

    let data = export_snapshot(&driver)?;
    let path = validate_output_path(output)?;
    std::fs::write(&path, &data).map_err(|e| PipelineError::IoError(e.to_string()))?;
    let checksum = snapshot_checksum(&driver).unwrap_or_default();

    if out.json {
        print_json(&serde_json::json!({
            "output": path.to_string_lossy(),
            "bytes": data.len(),
            "checksum": checksum,
        }));
    } else {
        println!("Wrote {} bytes to {}", data.len(), path.display());
        println!("Checksum: {}", checksum);
    }
    Ok(())
}

pub fn cmd_verify(snapshot_path: &Path, out: Output) -> Result<(), PipelineError> {
    let metadata = std::fs::metadata(snapshot_path)
        .map_err(|e| PipelineError::IoError(format!("Cannot read snapshot: {}", e)))?;
    if metadata.len() > MAX_SNAPSHOT_FILE_SIZE {
        return Err(PipelineError::IoError(format!(
            "Snapshot is {} bytes, maximum allowed is {} bytes",
            metadata.len(),
            MAX_SNAPSHOT_FILE_SIZE
        )));
    }
    let data = std::fs::read(snapshot_path)
        .map_err(|e| PipelineError::IoError(format!("Cannot read snapshot: {}", e)))?;
    let snapshot = import_snapshot(&data)?;

    if out.json {
        print_json(&snapshot);
        return Ok(());
    }

    println!("Snapshot OK: {}", snapshot_path.display());
    println!("Generation:   {}", snapshot.generation);
    println!("Inputs:       {}", snapshot.roots.len());
    println!("Stages:       {}", snapshot.stages.len());
    println!("Host outputs: {}", snapshot.host_outputs.len());
    println!("Diagnostics:  {}", snapshot.diagnostics.len());
    println!("Checksum:     {}", snapshot.checksum());
    Ok(())
}

pub fn cmd_hash(config_path: &Path, inputs_path: &Path, out: Output) -> Result<(), PipelineError> {
    let mut driver = load_driver(config_path)?;
    let inputs = config::load_inputs(inputs_path)?;
    if run_once(&mut driver, &inputs, &interrupt_token())?.is_none() {
        return Ok(());
    }
    let hash = snapshot_crypto_hash(&driver)?;

    if out.json {
        print_json(&serde_json::json!({
            "algorithm": "blake3",
            "hash": hash,
            "checksum": snapshot_checksum(&driver),
        }));
    } else {
        println!("{}", hash);
    }
    Ok(())
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

pub async fn cmd_server(
    config_path: &Path,
    inputs_path: Option<&Path>,
    host: &str,
    port: u16,
) -> Result<(), PipelineError> {
    let driver = load_driver(config_path)?;
    let inputs = match inputs_path {
        Some(path) => config::load_inputs(path)?,
        None => RootInputs::new(),
    };

    println!("Ripple Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", host);
    println!("  Port:     {}", port);
    println!("  Pipeline: {}", config_path.display());
    println!("  Stages:   {}", driver.pipeline().stage_count());
    println!("  Inputs:   {}", inputs.len());
    println!();
    println!("Endpoints:");
    println!("  POST /inputs         - Set root inputs");
    println!("  POST /inputs/remove  - Remove root inputs");
    println!("  POST /generations    - Run one generation");
    println!("  GET  /outputs        - Host outputs");
    println!("  GET  /diagnostics    - Diagnostics");
    println!("  GET  /report         - Last generation report");
    println!("  POST /export         - Base64 snapshot of the last generation");
    println!("  GET  /hash           - BLAKE3 hash of the last snapshot");
    println!("  GET  /status         - Pipeline status");
    println!("  GET  /health         - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, driver, inputs).await
}

// =============================================================================
// TESTS
// =============================================================================
