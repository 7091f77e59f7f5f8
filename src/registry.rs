//! In-memory job registry and state machine.
//!
//! One coarse lock guards the whole map. Every operation is a short
//! read-modify-write critical section; no I/O ever happens under the lock.
//! Writers are the per-job driver tasks, readers are status-polling
//! handlers and the retention sweep.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Job, JobSnapshot, JobStatus, ProgressSummary, TestResult};

/// Completion marker emitted by the runner for each finished test, e.g.
/// `UVM_INFO ... [TEST_DONE] Test SimplePingTest_seed123 (PASSED)`.
static TEST_DONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[TEST_DONE\]\s*Test\s*([\w.-]+_seed\d+)\s*\((\w+)\)")
        .expect("TEST_DONE marker regex is valid")
});

/// Attempted to create a job under an id that already exists.
#[derive(Debug, thiserror::Error)]
#[error("Job {0} already exists")]
pub struct DuplicateJob(pub Uuid);

/// Optional fields applied alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub message: Option<String>,
    pub command: Option<String>,
    pub returncode: Option<i32>,
}

impl StatusUpdate {
    pub fn message(msg: impl Into<String>) -> Self {
        StatusUpdate {
            message: Some(msg.into()),
            ..Default::default()
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_returncode(mut self, returncode: i32) -> Self {
        self.returncode = Some(returncode);
        self
    }
}

/// Thread-safe `Uuid → Job` map with atomic update primitives.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fresh job in the `queued` state.
    pub fn create(&self, job_id: Uuid) -> Result<(), DuplicateJob> {
        let mut jobs = self.jobs.write().expect("job registry lock poisoned");
        if jobs.contains_key(&job_id) {
            return Err(DuplicateJob(job_id));
        }
        jobs.insert(job_id, Job::new(job_id));
        Ok(())
    }

    /// Apply a status transition plus any subset of {message, command,
    /// returncode}.
    ///
    /// Unknown ids get an `initializing` placeholder instead of an error
    /// (legacy defensive behavior, kept and logged). A transition that
    /// violates the monotonic state machine - in particular any write to a
    /// terminal job - is ignored with a warning.
    pub fn update_status(&self, job_id: Uuid, new_status: JobStatus, update: StatusUpdate) {
        let mut jobs = self.jobs.write().expect("job registry lock poisoned");
        let job = jobs.entry(job_id).or_insert_with(|| {
            warn!("Status update for unknown job {job_id}; installing placeholder entry");
            Job::placeholder(job_id)
        });

        if !job.status.can_transition_to(new_status) {
            warn!(
                "Ignoring status transition {} -> {} for job {job_id}",
                job.status, new_status
            );
            return;
        }

        job.status = new_status;
        if new_status.is_terminal() && job.finished_at.is_none() {
            job.finished_at = Some(Utc::now());
        }
        if let Some(message) = update.message {
            job.message = message;
        }
        if let Some(command) = update.command {
            job.command = Some(command);
        }
        if let Some(returncode) = update.returncode {
            job.returncode = Some(returncode);
        }
    }

    /// Install the live progress counter for a job.
    pub fn init_progress(&self, job_id: Uuid, total_selected: usize) {
        let mut jobs = self.jobs.write().expect("job registry lock poisoned");
        if let Some(job) = jobs.get_mut(&job_id) {
            job.progress_summary = Some(ProgressSummary::new(total_selected));
        }
    }

    /// Append one output line.
    ///
    /// While the job is `running_simulation` and a progress counter exists,
    /// the line is scanned for a `[TEST_DONE]` completion marker and the
    /// live counters are advanced, capped at `total_selected`. This is a
    /// non-authoritative UI estimate; the verdict resolver produces the
    /// definitive per-case results later and this path never touches
    /// `detailed_results`.
    pub fn append_line(&self, job_id: Uuid, line: impl Into<String>) {
        let line = line.into();
        let mut jobs = self.jobs.write().expect("job registry lock poisoned");
        let job = jobs.entry(job_id).or_insert_with(|| {
            warn!("Output line for unknown job {job_id}; installing placeholder entry");
            Job::placeholder(job_id)
        });

        if job.status == JobStatus::RunningSimulation
            && let Some(summary) = job.progress_summary.as_mut()
            && let Some(caps) = TEST_DONE_RE.captures(&line)
            && summary.processed_count < summary.total_selected
        {
            summary.processed_count += 1;
            match caps.get(2).map(|m| m.as_str()) {
                Some("PASSED") => summary.passed_count += 1,
                Some("FAILED") => summary.failed_count += 1,
                // Other runner statuses count as processed only; the
                // final resolution decides pass/fail.
                _ => {}
            }
            debug!(
                "Job {job_id} live progress: {}/{} processed",
                summary.processed_count, summary.total_selected
            );
        }

        job.output_lines.push(line);
    }

    /// One-shot population of the definitive per-case results.
    pub fn set_detailed_results(&self, job_id: Uuid, results: Vec<TestResult>) {
        let mut jobs = self.jobs.write().expect("job registry lock poisoned");
        match jobs.get_mut(&job_id) {
            Some(job) if job.detailed_results.is_empty() => {
                job.detailed_results = results;
            }
            Some(_) => {
                warn!("Detailed results for job {job_id} already set; ignoring rewrite");
            }
            None => {
                warn!("Detailed results for unknown job {job_id}; dropping");
            }
        }
    }

    /// Point-in-time view of a job. Unknown ids yield the `not_found`
    /// sentinel; this never fails.
    pub fn snapshot(&self, job_id: Uuid) -> JobSnapshot {
        let jobs = self.jobs.read().expect("job registry lock poisoned");
        jobs.get(&job_id)
            .map(Job::snapshot)
            .unwrap_or_else(JobSnapshot::not_found)
    }

    /// Number of tracked jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.read().expect("job registry lock poisoned").len()
    }

    /// Remove terminal jobs that finished before `cutoff`. Non-terminal
    /// jobs are never evicted. Returns the number of evicted jobs.
    pub fn evict_terminal_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write().expect("job registry lock poisoned");
        let before = jobs.len();
        jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.finished_at.is_some_and(|t| t < cutoff))
        });
        before - jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn registry_with_running_job(total: usize) -> (JobRegistry, Uuid) {
        let registry = JobRegistry::new();
        let job_id = Uuid::new_v4();
        registry.create(job_id).unwrap();
        registry.init_progress(job_id, total);
        registry.update_status(
            job_id,
            JobStatus::RunningSimulation,
            StatusUpdate::message("Executing runner..."),
        );
        (registry, job_id)
    }

    #[test]
    fn test_unknown_job_snapshot_is_not_found_sentinel() {
        let registry = JobRegistry::new();
        let snapshot = registry.snapshot(Uuid::new_v4());
        assert_eq!(snapshot.status, JobStatus::NotFound);
        assert!(snapshot.job_id.is_none());
    }

    #[test]
    fn test_duplicate_create_is_rejected() {
        let registry = JobRegistry::new();
        let job_id = Uuid::new_v4();
        registry.create(job_id).unwrap();
        assert!(registry.create(job_id).is_err());
    }

    #[test]
    fn test_terminal_status_writes_are_ignored() {
        let registry = JobRegistry::new();
        let job_id = Uuid::new_v4();
        registry.create(job_id).unwrap();
        registry.update_status(job_id, JobStatus::Completed, StatusUpdate::message("done"));
        registry.update_status(
            job_id,
            JobStatus::Failed,
            StatusUpdate::message("late failure"),
        );

        let snapshot = registry.snapshot(job_id);
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.message, "done");
    }

    #[test]
    fn test_update_for_unknown_job_installs_placeholder() {
        let registry = JobRegistry::new();
        let job_id = Uuid::new_v4();
        registry.update_status(
            job_id,
            JobStatus::PreparingConfig,
            StatusUpdate::message("late to the party"),
        );
        let snapshot = registry.snapshot(job_id);
        assert_eq!(snapshot.status, JobStatus::PreparingConfig);
    }

    #[test]
    fn test_live_progress_counts_markers() {
        let (registry, job_id) = registry_with_running_job(3);

        registry.append_line(job_id, "[TEST_DONE] Test t1_seed1 (PASSED)");
        registry.append_line(job_id, "plain log line, no marker");
        registry.append_line(job_id, "UVM_INFO @ 12ns [TEST_DONE] Test t2_seed2 (FAILED)");

        let summary = registry.snapshot(job_id).progress_summary.unwrap();
        assert_eq!(summary.processed_count, 2);
        assert_eq!(summary.passed_count, 1);
        assert_eq!(summary.failed_count, 1);
    }

    #[test]
    fn test_processed_count_never_exceeds_total_selected() {
        let (registry, job_id) = registry_with_running_job(2);

        for i in 0..5 {
            registry.append_line(job_id, format!("[TEST_DONE] Test t{i}_seed{i} (PASSED)"));
        }

        let summary = registry.snapshot(job_id).progress_summary.unwrap();
        assert_eq!(summary.processed_count, 2);
        assert_eq!(summary.passed_count, 2);
    }

    #[test]
    fn test_markers_outside_running_state_do_not_advance_progress() {
        let registry = JobRegistry::new();
        let job_id = Uuid::new_v4();
        registry.create(job_id).unwrap();
        registry.init_progress(job_id, 2);

        // Still queued: marker lines are stored but not counted.
        registry.append_line(job_id, "[TEST_DONE] Test t1_seed1 (PASSED)");

        let snapshot = registry.snapshot(job_id);
        assert_eq!(snapshot.output_lines.len(), 1);
        assert_eq!(snapshot.progress_summary.unwrap().processed_count, 0);
    }

    #[test]
    fn test_non_pass_fail_marker_counts_as_processed_only() {
        let (registry, job_id) = registry_with_running_job(2);
        registry.append_line(job_id, "[TEST_DONE] Test t1_seed1 (TIMEOUT)");

        let summary = registry.snapshot(job_id).progress_summary.unwrap();
        assert_eq!(summary.processed_count, 1);
        assert_eq!(summary.passed_count, 0);
        assert_eq!(summary.failed_count, 0);
    }

    #[test]
    fn test_detailed_results_set_once() {
        let registry = JobRegistry::new();
        let job_id = Uuid::new_v4();
        registry.create(job_id).unwrap();

        let first = vec![TestResult {
            id: "t1_seed1".to_string(),
            status: crate::models::Verdict::Passed,
            error_hint: String::new(),
            display_log_path: "base/sim/t1_seed1/latest/run.log".to_string(),
        }];
        registry.set_detailed_results(job_id, first.clone());
        registry.set_detailed_results(job_id, Vec::new());

        assert_eq!(registry.snapshot(job_id).detailed_results, first);
    }

    #[test]
    fn test_retention_evicts_only_old_terminal_jobs() {
        let registry = JobRegistry::new();

        let finished = Uuid::new_v4();
        registry.create(finished).unwrap();
        registry.update_status(finished, JobStatus::Completed, StatusUpdate::default());

        let running = Uuid::new_v4();
        registry.create(running).unwrap();
        registry.update_status(running, JobStatus::RunningSimulation, StatusUpdate::default());

        // Cutoff in the future: the completed job is older than it.
        let evicted = registry.evict_terminal_older_than(Utc::now() + Duration::hours(1));
        assert_eq!(evicted, 1);
        assert_eq!(registry.job_count(), 1);
        assert_eq!(
            registry.snapshot(finished).status,
            JobStatus::NotFound,
            "evicted job must report not_found"
        );
        assert_eq!(
            registry.snapshot(running).status,
            JobStatus::RunningSimulation
        );
    }

    #[test]
    fn test_retention_keeps_recent_terminal_jobs() {
        let registry = JobRegistry::new();
        let job_id = Uuid::new_v4();
        registry.create(job_id).unwrap();
        registry.update_status(job_id, JobStatus::Failed, StatusUpdate::default());

        let evicted = registry.evict_terminal_older_than(Utc::now() - Duration::hours(1));
        assert_eq!(evicted, 0);
        assert_eq!(registry.job_count(), 1);
    }
}
