//! CLI end-to-end tests
//!
//! These cover the paths that do not need ffmpeg installed.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

#[allow(deprecated)]
fn clipforge_cmd() -> Command {
    Command::cargo_bin("clipforge").unwrap()
}

#[test]
fn no_args_shows_usage() {
    clipforge_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn help_lists_subcommands() {
    clipforge_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("batch"))
        .stdout(predicate::str::contains("compile"))
        .stdout(predicate::str::contains("check-tools"));
}

#[test]
fn version_command() {
    clipforge_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("clipforge "));
}

#[test]
fn check_tools_reports_ffmpeg() {
    clipforge_cmd()
        .arg("check-tools")
        .assert()
        .success()
        .stdout(predicate::str::contains("ffmpeg"))
        .stdout(predicate::str::contains("ffprobe"));
}

#[test]
fn validate_config_defaults() {
    clipforge_cmd()
        .arg("validate-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("using defaults"))
        .stdout(predicate::str::contains("libx264"));
}

#[test]
fn validate_config_reports_warnings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("clipforge.json");
    fs::write(
        &path,
        r#"{ "supervisor": { "invocation_timeout_secs": 0 }, "scheduler": { "workers": 3 } }"#,
    )
    .unwrap();

    clipforge_cmd()
        .args(["--config", path.to_str().unwrap(), "validate-config"])
        .assert()
        .success()
        .stdout(predicate::str::contains("warning"))
        .stdout(predicate::str::contains("invocation_timeout_secs"))
        .stdout(predicate::str::contains("Workers: 3"));
}

#[test]
fn validate_config_rejects_bad_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ not json").unwrap();

    clipforge_cmd()
        .args(["--config", path.to_str().unwrap(), "validate-config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config"));
}

#[test]
fn probe_missing_file_fails() {
    clipforge_cmd()
        .args(["probe", "/nonexistent/clip.mp4"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found").or(predicate::str::contains("Not found")));
}

#[test]
fn compile_rejects_malformed_pipeline() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pipeline.json");
    fs::write(&path, r#"{ "inputs": [], "stages": [{ "type": "warp" }] }"#).unwrap();

    clipforge_cmd()
        .args(["compile", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load pipeline"));
}

#[test]
fn compile_reports_missing_input() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pipeline.json");
    fs::write(
        &path,
        r#"{
            "inputs": [{ "slot": "src", "path": "/nonexistent/a.mp4" }],
            "stages": [{ "type": "trim", "inputs": ["src"], "output": "cut", "start": 1, "end": 2 }],
            "output": { "slot": "cut", "path": "/tmp/cut.mp4" }
        }"#,
    )
    .unwrap();

    clipforge_cmd()
        .args(["compile", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("a.mp4"));
}

#[test]
fn batch_requires_pipelines() {
    clipforge_cmd()
        .arg("batch")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}
