//! End-to-end rerun flow against a stub runner executable.
//!
//! Uses a shell script standing in for the external regression runner so
//! the whole path from submission through config prep, process streaming,
//! verdict resolution and detailed results can be exercised for real.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, test, web};
use tempfile::TempDir;
use uuid::Uuid;

use sim_rerun_lib::models::{JobStatus, RerunRequest, Verdict};
use sim_rerun_lib::registry::JobRegistry;
use sim_rerun_lib::services::{FsConfigPreparer, JobDriver, NullReconciler};

/// Write an executable script that plays the runner's part.
fn write_stub_runner(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("stub_runner.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Minimal project tree carrying the template for component `mtu`.
fn write_project_root(root: &Path) {
    let ts_dir = root.join("dv/sim_ctrl/ts");
    fs::create_dir_all(&ts_dir).unwrap();
    fs::write(
        ts_dir.join("mtu.json"),
        serde_json::to_string_pretty(&serde_json::json!({
            "tests": [],
            "regressions": []
        }))
        .unwrap(),
    )
    .unwrap();
}

fn rerun_request(cases: &[&str]) -> RerunRequest {
    serde_json::from_value(serde_json::json!({
        "selectedCases": cases,
        "branchPath": "work/report_area/mtu-vcs",
    }))
    .unwrap()
}

fn driver_for(root: &Path, runner: &Path, registry: JobRegistry) -> Arc<JobDriver> {
    Arc::new(JobDriver::new(
        registry,
        Arc::new(FsConfigPreparer::new(Some(root.to_path_buf()))),
        Arc::new(NullReconciler),
        runner.to_string_lossy().into_owned(),
        Some(root.to_path_buf()),
    ))
}

#[tokio::test]
async fn test_full_rerun_flow_with_markers_and_no_sim_root() {
    let dir = TempDir::new().unwrap();
    write_project_root(dir.path());
    let runner = write_stub_runner(
        dir.path(),
        concat!(
            "echo 'Runner starting up'\n",
            "echo '[TEST_DONE] Test t1_seed1 (PASSED)'\n",
            "echo '[TEST_DONE] Test t2_seed2 (FAILED)'\n",
            "exit 0"
        ),
    );

    let registry = JobRegistry::new();
    let driver = driver_for(dir.path(), &runner, registry.clone());

    let job_id = Uuid::new_v4();
    registry.create(job_id).unwrap();
    driver
        .spawn(job_id, rerun_request(&["t1_seed1", "t2_seed2"]))
        .await
        .unwrap();

    let snapshot = registry.snapshot(job_id);
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.returncode, Some(0));

    let summary = snapshot.progress_summary.unwrap();
    assert_eq!(summary.total_selected, 2);
    assert_eq!(summary.processed_count, 2);
    assert_eq!(summary.passed_count, 1);
    assert_eq!(summary.failed_count, 1);

    assert_eq!(snapshot.detailed_results.len(), 2);
    let t1 = &snapshot.detailed_results[0];
    assert_eq!(t1.id, "t1_seed1");
    assert_eq!(t1.status, Verdict::Passed);
    assert!(t1.error_hint.is_empty());

    let t2 = &snapshot.detailed_results[1];
    assert_eq!(t2.id, "t2_seed2");
    assert_eq!(t2.status, Verdict::Failed);
    assert_eq!(t2.error_hint, "failed (from process output marker)");
    assert_eq!(
        t2.display_log_path,
        "work/report_area/mtu-vcs/sim/t2_seed2/latest/run.log"
    );

    // The rerun configuration document was written under the project root.
    assert!(dir.path().join("dv/sim_ctrl/ts/temp/rerun.json").exists());
}

#[tokio::test]
async fn test_summary_artifact_overrides_conflicting_marker() {
    let dir = TempDir::new().unwrap();
    write_project_root(dir.path());

    // Filesystem state says t1 passed even though the stream claims FAILED.
    let case_dir = dir
        .path()
        .join("work/report_area/mtu-vcs/sim/t1_seed1/latest");
    fs::create_dir_all(&case_dir).unwrap();
    fs::write(case_dir.join("parse_run.log"), "run.log PASSED\n").unwrap();

    let runner = write_stub_runner(
        dir.path(),
        "echo '[TEST_DONE] Test t1_seed1 (FAILED)'\nexit 0",
    );

    let registry = JobRegistry::new();
    let driver = driver_for(dir.path(), &runner, registry.clone());

    let job_id = Uuid::new_v4();
    registry.create(job_id).unwrap();
    driver.spawn(job_id, rerun_request(&["t1_seed1"])).await.unwrap();

    let snapshot = registry.snapshot(job_id);
    assert_eq!(snapshot.status, JobStatus::Completed);
    let result = &snapshot.detailed_results[0];
    assert_eq!(result.status, Verdict::Passed);
    assert!(result.error_hint.is_empty());
    assert_eq!(
        result.display_log_path,
        "work/report_area/mtu-vcs/sim/t1_seed1/latest/run.log"
    );
}

#[tokio::test]
async fn test_nonzero_runner_exit_fails_job_but_still_resolves() {
    let dir = TempDir::new().unwrap();
    write_project_root(dir.path());
    let runner = write_stub_runner(
        dir.path(),
        concat!(
            "echo '[TEST_DONE] Test t1_seed1 (PASSED)'\n",
            "echo 'fatal elaboration error' 1>&2\n",
            "exit 2"
        ),
    );

    let registry = JobRegistry::new();
    let driver = driver_for(dir.path(), &runner, registry.clone());

    let job_id = Uuid::new_v4();
    registry.create(job_id).unwrap();
    driver.spawn(job_id, rerun_request(&["t1_seed1"])).await.unwrap();

    let snapshot = registry.snapshot(job_id);
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.returncode, Some(2));
    assert!(
        snapshot
            .output_lines
            .iter()
            .any(|l| l.contains("fatal elaboration error")),
        "stderr must be mirrored into output_lines"
    );
    // Verdict resolution still ran against the partial output.
    assert_eq!(snapshot.detailed_results.len(), 1);
    assert_eq!(snapshot.detailed_results[0].status, Verdict::Passed);
}

#[actix_rt::test]
async fn test_http_submission_round_trip() {
    let dir = TempDir::new().unwrap();
    write_project_root(dir.path());
    let runner = write_stub_runner(
        dir.path(),
        "echo '[TEST_DONE] Test t1_seed1 (PASSED)'\nexit 0",
    );

    let registry = JobRegistry::new();
    let driver = driver_for(dir.path(), &runner, registry.clone());

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(registry.clone()))
            .app_data(web::Data::new(driver))
            .configure(sim_rerun_lib::api::configure_rerun_routes),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/rerun")
        .set_json(serde_json::json!({
            "selectedCases": ["t1_seed1"],
            "branchPath": "work/report_area/mtu-vcs"
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "queued");
    let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();

    // Poll until the background task finishes.
    let mut snapshot = registry.snapshot(job_id);
    for _ in 0..100 {
        if snapshot.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        snapshot = registry.snapshot(job_id);
    }

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.detailed_results.len(), 1);
    assert_eq!(snapshot.detailed_results[0].status, Verdict::Passed);
}
