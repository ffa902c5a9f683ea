//! Batch runs through the scheduler backed by a real engine.

mod common;

use std::sync::Arc;

use cf_batch::{Job, JobStatus, PipelineRunner, Scheduler};
use cf_core::config::SchedulerConfig;
use cf_core::events::EventPayload;
use cf_core::ErrorKind;
use cf_pipeline::{ExecutionStatus, Pipeline, StageNode};
use cf_pipeline::stage::{Stage, TimeSpec, TrimParams};

use common::{clip, engine, no_workspaces_left, ScriptedRunner, StaticProber};

fn trim(input: &str, dest: std::path::PathBuf) -> Pipeline {
    Pipeline::new()
        .input("src", input)
        .stage(StageNode::new(
            Stage::Trim(TrimParams {
                start: TimeSpec::Seconds(0.0),
                end: Some(TimeSpec::Seconds(30.0)),
                duration: None,
            }),
            &["src"],
            Some("cut"),
        ))
        .output("cut", dest)
}

#[tokio::test]
async fn failing_job_does_not_affect_the_others() {
    let temp = tempfile::tempdir().unwrap();
    let prober = StaticProber::new()
        .with(clip("/media/a.mp4", 120.0))
        .with(clip("/media/b.mp4", 90.0))
        .produces(clip("out", 30.0));
    let runner: Arc<dyn PipelineRunner> = Arc::new(engine(
        prober,
        Arc::new(ScriptedRunner::succeeding()),
        temp.path(),
    ));
    let scheduler = Scheduler::new(
        runner,
        &SchedulerConfig {
            workers: Some(2),
            ..Default::default()
        },
    );
    let mut events = scheduler.events().subscribe();

    let jobs = vec![
        Job::new(trim("/media/a.mp4", temp.path().join("a.mp4"))),
        Job::new(trim("/media/missing.mp4", temp.path().join("m.mp4"))),
        Job::new(trim("/media/b.mp4", temp.path().join("b.mp4"))),
    ];
    let ids: Vec<_> = jobs.iter().map(|j| j.id).collect();
    let results = scheduler.run_all(jobs).await;

    assert_eq!(results[0].status, ExecutionStatus::Success);
    assert_eq!(results[1].error_kind(), Some(ErrorKind::NotFound));
    assert_eq!(results[2].status, ExecutionStatus::Success);
    assert_eq!(scheduler.status(ids[1]), Some(JobStatus::Failed));
    assert_eq!(scheduler.status(ids[2]), Some(JobStatus::Completed));
    assert!(temp.path().join("a.mp4").exists());
    assert!(temp.path().join("b.mp4").exists());
    assert!(no_workspaces_left(temp.path()));

    let mut failed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EventPayload::JobFailed { job_id, kind, .. } = event.payload {
            failed.push((job_id, kind));
        }
    }
    assert_eq!(failed, vec![(ids[1], ErrorKind::NotFound)]);
}
