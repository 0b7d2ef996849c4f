//! Bounded build parallelism observed from outside the scheduler

use eci_deploy::build::{BuildJobStatus, BuildScheduler, BuildTarget, JobBoard};
use eci_deploy::clock::SystemClock;
use eci_deploy::test_helpers::FakeArtifactBuilder;
use futures::future::join;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn targets(count: usize) -> Vec<BuildTarget> {
    (0..count)
        .map(|i| {
            let name = format!("svc{i:02}");
            BuildTarget::new(&name, format!("/src/{name}"), format!("eci/{name}:latest"))
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_board_never_shows_more_running_than_the_window() {
    let builder = Arc::new(FakeArtifactBuilder::new().with_delay(Duration::from_secs(5)));
    let scheduler = BuildScheduler::new(builder.clone(), Arc::new(SystemClock), 3);
    let board = Arc::new(JobBoard::new());
    let targets = targets(10);

    let sampler = async {
        let mut peak = 0;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            peak = peak.max(board.running_count());
        }
        peak
    };

    let (report, peak) = join(
        scheduler.schedule_on(Arc::clone(&board), &targets, &[]),
        sampler,
    )
    .await;
    let report = report.unwrap();

    assert_eq!(peak, 3);
    assert_eq!(builder.max_concurrent(), 3);
    assert_eq!(report.scheduled_count(), 10);
    assert!(report
        .jobs
        .iter()
        .all(|job| job.status == BuildJobStatus::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn test_every_failure_is_collected_and_logged() {
    let logs = TempDir::new().unwrap();
    let builder = Arc::new(
        FakeArtifactBuilder::new()
            .with_delay(Duration::from_secs(1))
            .fail_target("svc02", "COPY failed: no such file")
            .fail_target("svc07", "exit code: 137"),
    );
    let scheduler = BuildScheduler::new(builder.clone(), Arc::new(SystemClock), 4)
        .with_log_directory(logs.path());

    let report = scheduler.schedule(&targets(9), &[]).await.unwrap();

    assert_eq!(builder.calls().len(), 9);
    let failed: Vec<&str> = report.failed.iter().map(|f| f.target.as_str()).collect();
    assert_eq!(failed, vec!["svc02", "svc07"]);

    let log = std::fs::read_to_string(logs.path().join("svc07.log")).unwrap();
    assert_eq!(log, "exit code: 137");
    assert!(logs.path().join("svc00.log").exists());

    let err = report.into_result().unwrap_err();
    assert!(err.to_string().contains("svc02, svc07"));
}
