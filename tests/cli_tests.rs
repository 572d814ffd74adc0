//! Integration tests for the mystic binary's discover/inspect/schema
//! subcommands.
#![allow(deprecated)] // Command::cargo_bin is the stable spawn path here

use assert_cmd::Command;
use predicates::prelude::*;

fn sample_tree() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(
        tmp.path().join("shipping.rs"),
        r#"
/// Quote a shipment.
pub fn quote(weight_kg: f64, express: bool) -> u64 {
    let base = (weight_kg * 100.0) as u64;
    if express { base * 2 } else { base }
}

fn internal_rate() -> u64 { 7 }
"#,
    )
    .unwrap();
    tmp
}

#[test]
fn discover_lists_public_functions() {
    let tmp = sample_tree();
    let mut cmd = Command::cargo_bin("mystic").unwrap();
    cmd.arg("--root")
        .arg(tmp.path())
        .arg("discover")
        .env("MYSTIC_DATA_DIR", tmp.path().join(".mystic"));

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("shipping::quote"))
        .stdout(predicate::str::contains("fn quote"))
        .stdout(predicate::str::contains("internal_rate").not());
}

#[test]
fn discover_private_flag_includes_private_functions() {
    let tmp = sample_tree();
    let mut cmd = Command::cargo_bin("mystic").unwrap();
    cmd.arg("--root")
        .arg(tmp.path())
        .arg("discover")
        .arg("--private")
        .env("MYSTIC_DATA_DIR", tmp.path().join(".mystic"));

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("internal_rate"));
}

#[test]
fn schema_prints_object_schema() {
    let tmp = sample_tree();
    let mut cmd = Command::cargo_bin("mystic").unwrap();
    cmd.arg("schema")
        .arg(tmp.path().join("shipping.rs"))
        .arg("quote")
        .env("MYSTIC_DATA_DIR", tmp.path().join(".mystic"));

    let output = cmd.assert().success().get_output().stdout.clone();
    let schema: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(schema["type"], "object");
    assert_eq!(schema["properties"]["weight_kg"]["type"], "number");
    assert_eq!(schema["properties"]["express"]["type"], "boolean");
    assert_eq!(schema["required"], serde_json::json!(["weight_kg", "express"]));
}

#[test]
fn inspect_reports_doc_and_complexity() {
    let tmp = sample_tree();
    let mut cmd = Command::cargo_bin("mystic").unwrap();
    cmd.arg("inspect")
        .arg(tmp.path().join("shipping.rs"))
        .arg("quote")
        .env("MYSTIC_DATA_DIR", tmp.path().join(".mystic"));

    let output = cmd.assert().success().get_output().stdout.clone();
    let analysis: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(analysis["doc"]["summary"], "Quote a shipment.");
    assert_eq!(analysis["performance"]["cyclomatic_complexity"], 2);
}

#[test]
fn inspect_unknown_function_fails() {
    let tmp = sample_tree();
    let mut cmd = Command::cargo_bin("mystic").unwrap();
    cmd.arg("inspect")
        .arg(tmp.path().join("shipping.rs"))
        .arg("missing")
        .env("MYSTIC_DATA_DIR", tmp.path().join(".mystic"));

    cmd.assert().failure();
}
