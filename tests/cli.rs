//! CLI smoke tests

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use image::{Rgb, RgbImage};
use predicates::prelude::*;
use serde_json::json;

fn cmd() -> Command {
    Command::cargo_bin("exam-recombiner").unwrap()
}

/// Empty config file so the user's config dir never leaks into tests
fn empty_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.toml");
    std::fs::write(&path, "").unwrap();
    path
}

fn write_annotations(dir: &Path) -> PathBuf {
    RgbImage::from_pixel(800, 1000, Rgb([0, 0, 0]))
        .save(dir.join("p1.png"))
        .unwrap();
    let path = dir.join("annotations.json");
    let value = json!([{
        "image_path": "p1.png",
        "width": 800,
        "height": 1000,
        "annotations": [
            { "label": "header", "bbox": [40, 40, 760, 100], "confidence": 0.95 },
            { "label": "question_block", "bbox": [40, 120, 760, 400], "confidence": 0.9 },
            { "label": "question_block", "bbox": [40, 450, 760, 700], "confidence": 0.9 },
            { "label": "footer", "bbox": [40, 900, 760, 960], "confidence": 0.9 }
        ]
    }]);
    std::fs::write(&path, value.to_string()).unwrap();
    path
}

#[test]
fn test_help_lists_subcommands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run").and(predicate::str::contains("inspect")));
}

#[test]
fn test_version() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_run_missing_input() {
    let tmpdir = tempfile::tempdir().unwrap();
    let config = empty_config(tmpdir.path());
    cmd()
        .args(["run", "/nonexistent/annotations.json", "-o"])
        .arg(tmpdir.path().join("out.pdf"))
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Input file not found"));
}

#[test]
fn test_run_missing_config() {
    let tmpdir = tempfile::tempdir().unwrap();
    let input = write_annotations(tmpdir.path());
    cmd()
        .arg("run")
        .arg(&input)
        .arg("-o")
        .arg(tmpdir.path().join("out.pdf"))
        .args(["--config", "/nonexistent/config.toml"])
        .assert()
        .failure()
        .code(3);
}

#[test]
fn test_inspect_prints_linked_json() {
    let tmpdir = tempfile::tempdir().unwrap();
    let input = write_annotations(tmpdir.path());
    let config = empty_config(tmpdir.path());
    let output = cmd()
        .arg("inspect")
        .arg(&input)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let labels: Vec<&str> = value
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["detection"]["label"].as_str().unwrap())
        .collect();
    assert_eq!(labels, vec!["header", "question_block", "question_block", "footer"]);
}

#[test]
fn test_run_writes_outputs() {
    let tmpdir = tempfile::tempdir().unwrap();
    let input = write_annotations(tmpdir.path());
    let config = empty_config(tmpdir.path());
    let output = tmpdir.path().join("out").join("shuffled.pdf");

    cmd()
        .arg("run")
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .arg("--config")
        .arg(&config)
        .args(["--seed", "42", "--single-column", "--start-number", "3", "-q"])
        .assert()
        .success()
        .stdout(predicate::str::contains("seed 42").and(predicate::str::contains("Placement map")));

    assert!(output.exists());
    let placement = tmpdir.path().join("out").join("shuffled_placement.json");
    let map: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(placement).unwrap()).unwrap();
    assert_eq!(map["seed"], 42);
    let numbers: Vec<u64> = map["pages"][0]["items"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|i| i["question_number"].as_u64())
        .collect();
    assert_eq!(numbers, vec![3, 4]);
}
