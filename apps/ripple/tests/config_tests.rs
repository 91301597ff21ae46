//! Pipeline definition and input loading tests, run against real files.

#![allow(clippy::unwrap_used, clippy::panic)]

use ripple::config::{PipelineConfig, load_inputs};
use ripple::replay::parse_script;
use ripple_core::{CancellationToken, Driver, HostOutput, PipelineError, RootInputs};
use std::fs;
use tempfile::TempDir;

fn run(driver: &mut Driver, inputs: &RootInputs) -> Vec<HostOutput> {
    driver
        .run_generation(inputs, &CancellationToken::new())
        .unwrap()
        .report()
        .unwrap()
        .outputs
        .host_outputs
        .clone()
}

fn driver(definition: &str) -> Driver {
    PipelineConfig::from_toml(definition)
        .unwrap()
        .build_driver()
        .unwrap()
}

// =============================================================================
// LOADING
// =============================================================================

#[test]
fn test_load_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ripple.toml");
    fs::write(
        &path,
        "[driver]\nparallel = false\n\n[[stage]]\nname = \"out\"\nop = \"host\"\ninput = \"roots\"\n",
    )
    .unwrap();

    let config = PipelineConfig::load(&path).unwrap();
    assert!(!config.driver.parallel);
    assert_eq!(config.stages.len(), 1);
    let driver = config.build_driver().unwrap();
    assert_eq!(driver.pipeline().stage_count(), 2);
    assert!(!driver.options().parallel);
}

#[test]
fn test_missing_config_file() {
    let dir = TempDir::new().unwrap();
    let result = PipelineConfig::load(&dir.path().join("nope.toml"));
    assert!(matches!(result, Err(PipelineError::IoError(_))));
}

#[test]
fn test_load_inputs_from_directory() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), "alpha").unwrap();
    fs::create_dir(dir.path().join("sub")).unwrap();
    fs::write(dir.path().join("sub").join("b.txt"), "beta").unwrap();

    let inputs = load_inputs(dir.path()).unwrap();
    assert_eq!(
        inputs.iter().collect::<Vec<_>>(),
        vec![("a.txt", "alpha"), ("sub/b.txt", "beta")]
    );
}

#[test]
fn test_load_inputs_from_json_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("inputs.json");
    fs::write(&path, r#"{"one": "1", "two": "2"}"#).unwrap();

    let inputs = load_inputs(&path).unwrap();
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs.get("two"), Some("2"));
}

#[test]
fn test_load_inputs_missing_path() {
    let dir = TempDir::new().unwrap();
    assert!(load_inputs(&dir.path().join("missing")).is_err());
}

// =============================================================================
// CATALOG END TO END
// =============================================================================

#[test]
fn test_lines_keep_emission_order() {
    let mut driver = driver(
        r#"
        [[stage]]
        name = "lines"
        op = "lines"
        input = "roots"

        [[stage]]
        name = "kept"
        op = "nonempty"
        input = "lines"

        [[stage]]
        name = "out"
        op = "host"
        input = "kept"
        "#,
    );
    let inputs = RootInputs::from_pairs([("doc", "first\n\nthird")]).unwrap();
    assert_eq!(
        run(&mut driver, &inputs),
        vec![HostOutput::new("doc#0", "first"), HostOutput::new("doc#2", "third")]
    );
}

#[test]
fn test_nested_root_keys_do_not_collide_with_fan_out() {
    let mut driver = driver(
        r#"
        [[stage]]
        name = "lines"
        op = "lines"
        input = "roots"

        [[stage]]
        name = "raw"
        op = "host"
        input = "roots"

        [[stage]]
        name = "split"
        op = "host"
        input = "lines"
        "#,
    );
    let inputs = RootInputs::from_pairs([("a", "p\nq"), ("a/1", "z")]).unwrap();
    let outcome = driver
        .run_generation(&inputs, &CancellationToken::new())
        .unwrap();
    let report = outcome.report().unwrap();

    assert!(report.outputs.diagnostics.is_empty());
    assert_eq!(
        report.outputs.host_outputs,
        vec![
            HostOutput::new("a", "p\nq"),
            HostOutput::new("a/1", "z"),
            HostOutput::new("a#0", "p"),
            HostOutput::new("a#1", "q"),
            HostOutput::new("a/1#0", "z"),
        ]
    );
}

#[test]
fn test_join_and_attach() {
    let mut driver = driver(
        r#"
        [[stage]]
        name = "out"
        op = "host"
        input = "tagged"
        arg = "tagged:"

        [[stage]]
        name = "tagged"
        op = "attach"
        input = "roots"
        arg = "all"

        [[stage]]
        name = "all"
        op = "join"
        input = "roots"
        arg = "+"
        "#,
    );
    let inputs = RootInputs::from_pairs([("a", "x"), ("b", "y")]).unwrap();
    assert_eq!(
        run(&mut driver, &inputs),
        vec![
            HostOutput::new("tagged:a", "x x+y"),
            HostOutput::new("tagged:b", "y x+y"),
        ]
    );
}

#[test]
fn test_always_run_stage_is_reinvoked() {
    let mut driver = driver(
        r#"
        [[stage]]
        name = "upper"
        op = "upper"
        input = "roots"
        always_run = true

        [[stage]]
        name = "out"
        op = "host"
        input = "upper"
        "#,
    );
    let inputs = RootInputs::from_pairs([("a", "x"), ("b", "y")]).unwrap();
    run(&mut driver, &inputs);
    let outcome = driver
        .run_generation(&inputs, &CancellationToken::new())
        .unwrap();
    let report = outcome.report().unwrap();
    let upper = report.stage("upper").unwrap();
    assert!(!upper.skipped);
    assert_eq!(upper.invocations, 2);
    assert_eq!(upper.cached, 2);
    // Equal outputs stop the wave.
    assert!(report.stage("out").unwrap().skipped);
}

#[test]
fn test_constant_output_is_emitted_once_and_cached() {
    let mut driver = driver(
        r#"
        [[stage]]
        name = "banner"
        op = "constant"
        arg = "hello"
        "#,
    );
    let empty = RootInputs::new();
    assert_eq!(run(&mut driver, &empty), vec![HostOutput::new("banner", "hello")]);

    let outcome = driver
        .run_generation(&empty, &CancellationToken::new())
        .unwrap();
    let report = outcome.report().unwrap();
    assert_eq!(report.outputs.host_outputs, vec![HostOutput::new("banner", "hello")]);
    assert_eq!(report.stage("banner").unwrap().cached, 1);
}

#[test]
fn test_replay_script_drives_generations() {
    let mut driver = driver(
        r#"
        [[stage]]
        name = "out"
        op = "host"
        input = "roots"
        "#,
    );
    let steps = parse_script(
        r#"[
            {"inputs": {"a": "1", "b": "2"}},
            {"set": {"a": "10"}},
            {"remove": ["b"]}
        ]"#,
    )
    .unwrap();

    let mut inputs = RootInputs::new();
    let mut last = Vec::new();
    for step in &steps {
        step.apply(&mut inputs).unwrap();
        last = run(&mut driver, &inputs);
    }
    assert_eq!(driver.generation(), Some(2));
    assert_eq!(last, vec![HostOutput::new("a", "10")]);
}
