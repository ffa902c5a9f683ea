//! End-to-end scenarios through the engine facade with a scripted ffmpeg.

mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use cf_core::ErrorKind;
use cf_pipeline::{ExecutionStatus, Pipeline, Strategy};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{clip, engine, no_workspaces_left, ScriptedRunner, StaticProber};

fn pipeline(value: serde_json::Value) -> Pipeline {
    Pipeline::from_json(&value.to_string()).unwrap()
}

#[tokio::test]
async fn trim_to_sixty_seconds_succeeds_on_the_fast_path() {
    let temp = tempfile::tempdir().unwrap();
    let dest = temp.path().join("cut.mp4");
    let prober = StaticProber::new()
        .with(clip("/media/a.mp4", 120.0))
        .produces(clip("out", 60.0));
    let runner = Arc::new(ScriptedRunner::succeeding());

    let result = engine(prober, runner.clone(), temp.path())
        .run(
            &pipeline(json!({
                "inputs": [{ "slot": "src", "path": "/media/a.mp4" }],
                "stages": [
                    { "type": "trim", "inputs": ["src"], "output": "cut", "start": 30, "end": 90 }
                ],
                "output": { "slot": "cut", "path": dest }
            })),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Success, "{:?}", result.diagnostics);
    assert_eq!(result.attempted, vec![Strategy::StreamCopy]);
    assert_eq!(result.output_path.as_deref(), Some(dest.as_path()));
    assert!(dest.exists());
    assert_eq!(runner.calls().len(), 1);
    assert!(no_workspaces_left(temp.path()));
}

#[tokio::test]
async fn concat_with_dissolves_encodes_once() {
    let temp = tempfile::tempdir().unwrap();
    let dest = temp.path().join("reel.mp4");
    let prober = StaticProber::new()
        .with(clip("/media/1.mp4", 10.0))
        .with(clip("/media/2.mp4", 10.0))
        .with(clip("/media/3.mp4", 10.0))
        .produces(clip("out", 28.0));
    let runner = Arc::new(ScriptedRunner::succeeding());
    let engine = engine(prober, runner.clone(), temp.path());

    let reel = pipeline(json!({
        "inputs": [
            { "slot": "a", "path": "/media/1.mp4" },
            { "slot": "b", "path": "/media/2.mp4" },
            { "slot": "c", "path": "/media/3.mp4" }
        ],
        "stages": [{
            "type": "concat",
            "inputs": ["a", "b", "c"],
            "output": "reel",
            "transition": { "kind": "dissolve", "duration": 1.0 }
        }],
        "output": { "slot": "reel", "path": dest }
    }));

    let program = engine.compile(&reel).await.unwrap();
    assert_eq!(program.expected.duration, Some(28.0));
    assert!(!program.copy_eligible);

    let result = engine.run(&reel, CancellationToken::new()).await;
    assert_eq!(result.status, ExecutionStatus::Success, "{:?}", result.diagnostics);
    assert_eq!(result.attempted, vec![Strategy::Reencode]);
    assert!(runner.calls()[0].iter().any(|a| a.contains("xfade")));
}

#[tokio::test]
async fn rejected_copy_falls_back_to_reencode() {
    let temp = tempfile::tempdir().unwrap();
    let dest = temp.path().join("capped.mp4");
    let prober = StaticProber::new()
        .with(clip("/media/a.mp4", 60.0))
        .produces(clip("out", 60.0));
    let runner = Arc::new(ScriptedRunner::rejecting_copy());

    let result = engine(prober, runner.clone(), temp.path())
        .run(
            &pipeline(json!({
                "inputs": [{ "slot": "src", "path": "/media/a.mp4" }],
                "stages": [{
                    "type": "transcode",
                    "inputs": ["src"],
                    "output": "out",
                    "video": { "codec": "h264", "bitrate": "10M" }
                }],
                "output": { "slot": "out", "path": dest }
            })),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::FallbackSuccess);
    assert_eq!(result.attempted, vec![Strategy::StreamCopy, Strategy::Reencode]);
    assert!(result
        .warnings()
        .any(|d| d.kind == ErrorKind::EngineRejected));

    let calls = runner.calls();
    assert_eq!(calls.len(), 2);
    assert!(common::copies(&calls[0]));
    assert!(!common::copies(&calls[1]));
    assert!(dest.exists());
    assert!(no_workspaces_left(temp.path()));
}

#[tokio::test]
async fn missing_input_is_not_found_before_any_invocation() {
    let temp = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::succeeding());

    let result = engine(StaticProber::new(), runner.clone(), temp.path())
        .run(
            &pipeline(json!({
                "inputs": [{ "slot": "src", "path": "/media/nope.mp4" }],
                "stages": [
                    { "type": "trim", "inputs": ["src"], "output": "cut", "start": 0, "duration": 5 }
                ],
                "output": { "slot": "cut", "path": temp.path().join("cut.mp4") }
            })),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error_kind(), Some(ErrorKind::NotFound));
    assert!(result.attempted.is_empty());
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn engine_failure_is_not_retried() {
    let temp = tempfile::tempdir().unwrap();
    let prober = StaticProber::new().with(clip("/media/a.mp4", 120.0));
    let runner = Arc::new(ScriptedRunner::new(|_| {
        common::exit(1, "/out/cut.mp4: No space left on device")
    }));

    let result = engine(prober, runner.clone(), temp.path())
        .run(
            &pipeline(json!({
                "inputs": [{ "slot": "src", "path": "/media/a.mp4" }],
                "stages": [
                    { "type": "trim", "inputs": ["src"], "output": "cut", "start": 10, "end": 20 }
                ],
                "output": { "slot": "cut", "path": temp.path().join("cut.mp4") }
            })),
            CancellationToken::new(),
        )
        .await;

    assert_matches!(result.error_kind(), Some(ErrorKind::EngineFailed));
    assert_eq!(runner.calls().len(), 1);
    assert!(no_workspaces_left(temp.path()));
}

#[tokio::test]
async fn cancelled_run_leaves_no_workspace() {
    let temp = tempfile::tempdir().unwrap();
    let prober = StaticProber::new().with(clip("/media/a.mp4", 120.0));
    let runner = Arc::new(ScriptedRunner::succeeding());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = engine(prober, runner.clone(), temp.path())
        .run(
            &pipeline(json!({
                "inputs": [{ "slot": "src", "path": "/media/a.mp4" }],
                "stages": [
                    { "type": "trim", "inputs": ["src"], "output": "cut", "start": 10 }
                ],
                "output": { "slot": "cut", "path": temp.path().join("cut.mp4") }
            })),
            cancel,
        )
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
    assert!(runner.calls().is_empty());
    assert!(no_workspaces_left(temp.path()));
}
