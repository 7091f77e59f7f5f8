//! Job driver: sequences the stages of one rerun job end-to-end.
//!
//! Each job runs in its own spawned task. The driver walks the job through
//! `preparing_config → config_prepared → running_simulation → terminal`,
//! updating the registry at every transition, then resolves per-case
//! verdicts and hands them to the report reconciler. Any unrecoverable
//! stage error moves the job straight to `failed`; a catch-all guard at the
//! task boundary converts even a panic into a terminal state so no job is
//! ever left in limbo.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::JobError;
use crate::models::{JobStatus, RerunRequest};
use crate::registry::{JobRegistry, StatusUpdate};
use crate::services::config_prep::ConfigPreparer;
use crate::services::process::{self, ProcessError, ProcessRequest};
use crate::services::report::ReportReconciler;
use crate::services::verdict;

/// Drives rerun jobs to completion. One instance serves the whole server;
/// each submitted job gets its own task via [`JobDriver::spawn`].
pub struct JobDriver {
    registry: JobRegistry,
    preparer: Arc<dyn ConfigPreparer>,
    reconciler: Arc<dyn ReportReconciler>,
    runner_executable: String,
    project_root: Option<PathBuf>,
    shutdown: CancellationToken,
}

impl JobDriver {
    pub fn new(
        registry: JobRegistry,
        preparer: Arc<dyn ConfigPreparer>,
        reconciler: Arc<dyn ReportReconciler>,
        runner_executable: String,
        project_root: Option<PathBuf>,
    ) -> Self {
        JobDriver {
            registry,
            preparer,
            reconciler,
            runner_executable,
            project_root,
            shutdown: CancellationToken::new(),
        }
    }

    /// Launch the worker task for one job. The guard around `execute` turns
    /// any panic into a terminal `failed` status with diagnostic output.
    pub fn spawn(self: &Arc<Self>, job_id: Uuid, request: RerunRequest) -> JoinHandle<()> {
        let driver = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            info!("Worker task started for job {job_id}");
            let outcome = AssertUnwindSafe(driver.execute(job_id, request, cancel))
                .catch_unwind()
                .await;
            if let Err(panic) = outcome {
                let detail = panic_message(panic);
                error!("Critical error in task for job {job_id}: {detail}");
                driver
                    .registry
                    .append_line(job_id, format!("CRITICAL_TASK_ERROR: {detail}"));
                driver.registry.update_status(
                    job_id,
                    JobStatus::Failed,
                    StatusUpdate::message(format!("Critical error in task: {detail}")),
                );
            }
            info!("Worker task ended for job {job_id}");
        })
    }

    async fn execute(&self, job_id: Uuid, request: RerunRequest, cancel: CancellationToken) {
        self.registry.append_line(
            job_id,
            "Rerun task started. Preparing rerun configuration...",
        );
        // Counter goes in first so pollers see total_selected from the
        // start, not only once the runner is executing.
        self.registry
            .init_progress(job_id, request.selected_cases.len());
        self.registry.update_status(
            job_id,
            JobStatus::PreparingConfig,
            StatusUpdate::message("Preparing rerun configuration..."),
        );

        let Some(branch_path) = request
            .branch_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
        else {
            self.fail(job_id, "Branch path not provided by client.");
            return;
        };

        let Some(component) = derive_component(branch_path) else {
            self.fail(
                job_id,
                format!("Failed to derive component name from branch path: {branch_path}."),
            );
            return;
        };
        self.registry.append_line(
            job_id,
            format!("Derived component for configuration: {component}"),
        );

        if cancel.is_cancelled() {
            self.fail(job_id, "Job cancelled before configuration preparation.");
            return;
        }

        let preparer = Arc::clone(&self.preparer);
        let component_for_prep = component.clone();
        let cases_for_prep = request.selected_cases.clone();
        let prepared = tokio::task::spawn_blocking(move || {
            preparer.prepare(&component_for_prep, &cases_for_prep)
        })
        .await;
        let config_path = match prepared {
            Ok(Ok(path)) => path,
            Ok(Err(err)) => {
                self.fail(job_id, format!("Configuration preparation failed: {err}"));
                return;
            }
            Err(join_err) => {
                self.fail(
                    job_id,
                    format!("Configuration preparation task aborted: {join_err}"),
                );
                return;
            }
        };
        self.registry.append_line(
            job_id,
            format!("Rerun configuration written to {}", config_path.display()),
        );
        self.registry.update_status(
            job_id,
            JobStatus::ConfigPrepared,
            StatusUpdate::message("Rerun configuration prepared. Starting runner..."),
        );

        let dir_option = effective_dir_option(&request);
        let process_request =
            build_runner_command(&self.runner_executable, &request, dir_option.as_deref());
        let display_command = process_request.display_command();
        self.registry
            .append_line(job_id, format!("Constructed runner command: {display_command}"));

        self.registry.update_status(
            job_id,
            JobStatus::RunningSimulation,
            StatusUpdate::message("Executing runner. This may take some time...")
                .with_command(display_command),
        );

        let registry = self.registry.clone();
        let outcome = process::run_streaming(&process_request, &cancel, |line| {
            registry.append_line(job_id, line);
        })
        .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(ProcessError::Launch { program, source }) => {
                let err =
                    JobError::ProcessLaunch(format!("'{program}': {source}. Ensure it is on PATH."));
                self.fail(job_id, err.to_string());
                return;
            }
            Err(ProcessError::Stream(err)) => {
                self.fail(job_id, format!("Reading runner output failed: {err}"));
                return;
            }
            Err(ProcessError::Cancelled) => {
                self.fail(job_id, "Job cancelled before runner launch.");
                return;
            }
        };

        if !outcome.stderr_lines.is_empty() {
            self.registry.append_line(job_id, "Runner stderr:");
            for line in &outcome.stderr_lines {
                self.registry.append_line(job_id, line.clone());
            }
        }

        // Terminal status is recorded before verdict resolution so pollers
        // see the exit outcome immediately; detailed_results follow.
        let (final_status, final_message) = if outcome.returncode == 0 {
            (
                JobStatus::Completed,
                "Runner completed successfully.".to_string(),
            )
        } else {
            (
                JobStatus::Failed,
                format!("{}.", JobError::ProcessExecution(outcome.returncode)),
            )
        };
        self.registry.append_line(job_id, final_message.clone());
        self.registry.update_status(
            job_id,
            final_status,
            StatusUpdate::message(final_message).with_returncode(outcome.returncode),
        );

        let (sim_root, html_base) =
            plan_log_paths(self.project_root.as_deref(), dir_option.as_deref(), &request);
        self.registry.append_line(
            job_id,
            match &sim_root {
                Some(root) => format!("Sim root for verdict resolution: {}", root.display()),
                None => "Sim root for verdict resolution unavailable; relying on output markers."
                    .to_string(),
            },
        );

        let output_lines = self.registry.snapshot(job_id).output_lines;
        let cases = request.selected_cases.clone();
        let resolved = tokio::task::spawn_blocking(move || {
            cases
                .iter()
                .map(|case_id| {
                    verdict::resolve_case(
                        case_id,
                        sim_root.as_deref(),
                        html_base.as_deref(),
                        &output_lines,
                    )
                })
                .collect::<Vec<_>>()
        })
        .await;

        let results = match resolved {
            Ok(results) => results,
            Err(join_err) => {
                self.registry.append_line(
                    job_id,
                    format!("Verdict resolution task aborted: {join_err}"),
                );
                return;
            }
        };

        self.registry.append_line(
            job_id,
            format!("Resolved verdicts for {} case(s).", results.len()),
        );
        self.registry.set_detailed_results(job_id, results.clone());

        if let Err(err) = self.reconciler.apply(&results) {
            warn!("Report reconciliation failed for job {job_id}: {err}");
            self.registry.append_line(
                job_id,
                format!("Report reconciliation failed: {err} (job status unaffected)"),
            );
        }
    }

    /// Move the job to `failed` with a message, mirroring it into the
    /// output stream.
    fn fail(&self, job_id: Uuid, message: impl Into<String>) {
        let message = message.into();
        warn!("Job {job_id} failed: {message}");
        self.registry.append_line(job_id, format!("Error: {message}"));
        self.registry
            .update_status(job_id, JobStatus::Failed, StatusUpdate::message(message));
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unidentified panic".to_string()
    }
}

/// Component name for config prep: the branch directory's basename up to
/// the first '-', e.g. `".../work/area/mtu-vcs"` → `"mtu"`.
fn derive_component(branch_path: &str) -> Option<String> {
    let basename = Path::new(branch_path.trim_end_matches('/'))
        .file_name()?
        .to_str()?;
    let component = basename.split('-').next().unwrap_or_default();
    if component.is_empty() {
        None
    } else {
        Some(component.to_string())
    }
}

/// Work directory passed to the runner's `-dir` flag: the explicit request
/// field when present, otherwise derived from the branch path.
fn effective_dir_option(request: &RerunRequest) -> Option<String> {
    if let Some(dir) = request
        .dir_option
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
    {
        return Some(dir.to_string());
    }
    request
        .branch_path
        .as_deref()
        .and_then(derive_dir_from_branch)
}

/// First path segment after `"work/"`, provided at least one more segment
/// follows it (the segment must name the area above the simulator context,
/// not the context itself).
fn derive_dir_from_branch(branch_path: &str) -> Option<String> {
    let suffix = branch_path.split_once("work/")?.1;
    let mut segments = suffix.split('/').filter(|s| !s.is_empty() && *s != ".");
    let first = segments.next()?;
    segments.next()?;
    Some(first.to_string())
}

/// Construct the runner invocation for one rerun request.
fn build_runner_command(
    executable: &str,
    request: &RerunRequest,
    dir_option: Option<&str>,
) -> ProcessRequest {
    let mut args: Vec<String> = vec!["rerun".into(), "-t".into(), "rerun".into()];

    // Skip-optimize unless a full rebuild was requested.
    if !request.rebuild_cases {
        args.push("-so".into());
    }
    if request.include_waveform {
        args.push("-w".into());
    }
    if request.open_coverage {
        args.push("-c".into());
    }
    if request.sim_time_hours > 0 {
        let minutes = u64::from(request.sim_time_hours) * 60;
        args.push("-rto".into());
        args.push(minutes.to_string());
    }
    if let Some(dir) = dir_option {
        args.push("-dir".into());
        args.push(dir.to_string());
    }
    for (flag, value) in [
        ("-elab", request.elab_opts.as_deref()),
        ("-vlog", request.vlogan_opts.as_deref()),
        ("-ro", request.run_opts.as_deref()),
    ] {
        if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
            args.push(flag.to_string());
            args.push(value.to_string());
        }
    }

    ProcessRequest::new(executable, args)
}

/// Plan the verdict-resolution locations.
///
/// Returns the absolute sim root (requires a project root) and the
/// relative, forward-slash html base used for log links. Primary form is
/// `<root>/work/<dir>/<context>/sim` with base `work/<dir>/<context>`;
/// when no work directory was passed to the runner, falls back to the
/// branch-path suffix after `"work/"`.
fn plan_log_paths(
    project_root: Option<&Path>,
    dir_option: Option<&str>,
    request: &RerunRequest,
) -> (Option<PathBuf>, Option<String>) {
    let branch_path = request.branch_path.as_deref().unwrap_or_default();

    let vcs_context = request
        .vcs_context
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .or_else(|| {
            Path::new(branch_path.trim_end_matches('/'))
                .file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
        });

    if let Some(dir) = dir_option
        && let Some(context) = &vcs_context
    {
        let html_base = format!("work/{dir}/{context}");
        let sim_root = project_root
            .map(|root| root.join("work").join(dir).join(context).join("sim"));
        return (sim_root, Some(html_base));
    }

    if let Some(suffix) = branch_path.split_once("work/").map(|(_, s)| s)
        && !suffix.is_empty()
    {
        let html_base = format!("work/{}", suffix.trim_matches('/'));
        let sim_root = project_root.map(|root| {
            suffix
                .trim_matches('/')
                .split('/')
                .fold(root.join("work"), |p, seg| p.join(seg))
                .join("sim")
        });
        return (sim_root, Some(html_base));
    }

    (None, None)
}
