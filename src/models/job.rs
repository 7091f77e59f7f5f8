//! Job domain models and DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Definitive classification of one test case's rerun.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Passed,
    Failed,
    Unknown,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "PASSED",
            Self::Failed => "FAILED",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PASSED" => Some(Self::Passed),
            "FAILED" => Some(Self::Failed),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job lifecycle status.
///
/// Transitions are monotonic:
/// `queued → [pulling_updates →] preparing_config → config_prepared →
/// running_simulation → {completed | failed}`. Once a job is terminal,
/// further status writes are ignored by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Sentinel returned for unknown job ids; never stored.
    NotFound,
    /// Placeholder installed when an update arrives for an id the registry
    /// has never seen (legacy defensive upsert path).
    Initializing,
    /// Job accepted, worker task not yet past its first stage.
    Queued,
    /// Workspace refresh before config prep. Only emitted by deployments
    /// that pull updates first; the default driver skips this stage.
    PullingUpdates,
    /// Rerun configuration document is being generated.
    PreparingConfig,
    /// Configuration written; runner invocation is being constructed.
    ConfigPrepared,
    /// External runner process is executing.
    RunningSimulation,
    /// Runner exited cleanly; verdicts resolved.
    Completed,
    /// A fatal stage error or non-zero runner exit.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Initializing => "initializing",
            Self::Queued => "queued",
            Self::PullingUpdates => "pulling_updates",
            Self::PreparingConfig => "preparing_config",
            Self::ConfigPrepared => "config_prepared",
            Self::RunningSimulation => "running_simulation",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_found" => Some(Self::NotFound),
            "initializing" => Some(Self::Initializing),
            "queued" => Some(Self::Queued),
            "pulling_updates" => Some(Self::PullingUpdates),
            "preparing_config" => Some(Self::PreparingConfig),
            "config_prepared" => Some(Self::ConfigPrepared),
            "running_simulation" => Some(Self::RunningSimulation),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether the job has reached an end state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position in the one-directional lifecycle. `failed` can be entered
    /// from any stage, so both terminal states share the highest rank.
    fn rank(&self) -> u8 {
        match self {
            Self::NotFound | Self::Initializing => 0,
            Self::Queued => 1,
            Self::PullingUpdates => 2,
            Self::PreparingConfig => 3,
            Self::ConfigPrepared => 4,
            Self::RunningSimulation => 5,
            Self::Completed | Self::Failed => 6,
        }
    }

    /// Whether a transition from `self` to `next` respects monotonic,
    /// one-directional ordering. Re-asserting the current status (e.g. a
    /// message refresh) is allowed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        !self.is_terminal() && next.rank() >= self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parsed form of the composite case identifier `"<base_name>_seed<seed>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseId {
    pub base_name: String,
    pub seed: u64,
}

impl CaseId {
    /// Parse a composite id, splitting on the last `"_seed"` token.
    /// The seed portion must be all digits.
    pub fn parse(s: &str) -> Option<Self> {
        let idx = s.rfind("_seed")?;
        let (base, seed_part) = s.split_at(idx);
        let seed_str = &seed_part["_seed".len()..];
        if base.is_empty() || seed_str.is_empty() {
            return None;
        }
        let seed = seed_str.parse::<u64>().ok()?;
        Some(CaseId {
            base_name: base.to_string(),
            seed,
        })
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_seed{}", self.base_name, self.seed)
    }
}

/// Definitive outcome for one rerun test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    /// Composite case id (`"<base_name>_seed<seed>"`).
    pub id: String,
    /// Resolved verdict.
    pub status: Verdict,
    /// Diagnostic hint; empty when the case passed.
    pub error_hint: String,
    /// Forward-slash-joined path used by the report front end to link the
    /// rerun log. Wire name kept from the legacy report schema.
    #[serde(rename = "new_log_path")]
    pub display_log_path: String,
}

/// Live, non-authoritative progress estimate parsed from runner output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    /// Number of cases requested for this rerun.
    pub total_selected: usize,
    /// Completion markers observed so far (capped at `total_selected`).
    pub processed_count: usize,
    pub passed_count: usize,
    pub failed_count: usize,
}

impl ProgressSummary {
    pub fn new(total_selected: usize) -> Self {
        ProgressSummary {
            total_selected,
            processed_count: 0,
            passed_count: 0,
            failed_count: 0,
        }
    }
}

/// One tracked rerun job. Mutated only through the registry.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub message: String,
    /// Last constructed runner invocation, for display.
    pub command: Option<String>,
    pub returncode: Option<i32>,
    /// Append-only combined output stream (unbounded).
    pub output_lines: Vec<String>,
    pub progress_summary: Option<ProgressSummary>,
    /// Populated exactly once, after the job reaches a terminal state.
    pub detailed_results: Vec<TestResult>,
    pub created_at: DateTime<Utc>,
    /// Set on the transition into a terminal state; drives retention.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: Uuid) -> Self {
        Job {
            id,
            status: JobStatus::Queued,
            message: "Rerun job queued.".to_string(),
            command: None,
            returncode: None,
            output_lines: Vec::new(),
            progress_summary: None,
            detailed_results: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Placeholder entry for updates addressing an unknown id.
    pub fn placeholder(id: Uuid) -> Self {
        Job {
            status: JobStatus::Initializing,
            message: "Job initializing.".to_string(),
            ..Job::new(id)
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: Some(self.id),
            status: self.status,
            message: self.message.clone(),
            command: self.command.clone(),
            returncode: self.returncode,
            output_lines: self.output_lines.clone(),
            progress_summary: self.progress_summary,
            detailed_results: self.detailed_results.clone(),
        }
    }
}

/// Owned point-in-time view of a job, returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    pub status: JobStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returncode: Option<i32>,
    pub output_lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_summary: Option<ProgressSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub detailed_results: Vec<TestResult>,
}

impl JobSnapshot {
    /// Sentinel snapshot for unknown job ids. Status queries never fail.
    pub fn not_found() -> Self {
        JobSnapshot {
            job_id: None,
            status: JobStatus::NotFound,
            message: "Job ID not found.".to_string(),
            command: None,
            returncode: None,
            output_lines: Vec::new(),
            progress_summary: None,
            detailed_results: Vec::new(),
        }
    }
}

/// Request to rerun a selection of test cases.
///
/// Field names are camelCase on the wire, matching the legacy report
/// front end.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerunRequest {
    /// Composite case ids to rerun. Must be non-empty.
    pub selected_cases: Vec<String>,
    /// Workspace reference the rerun operates in, e.g.
    /// `".../work/report_area/mtu-vcs"`. Drives component derivation and
    /// log-path planning.
    #[serde(default)]
    pub branch_path: Option<String>,
    /// Rebuild all selected cases before running (omits the runner's
    /// skip-optimize flag).
    #[serde(default)]
    pub rebuild_cases: bool,
    /// Capture waveforms during the rerun.
    #[serde(default)]
    pub include_waveform: bool,
    /// Open the coverage view after the run.
    #[serde(default)]
    pub open_coverage: bool,
    /// Simulation time budget in hours; 0 means no override.
    #[serde(default)]
    pub sim_time_hours: u32,
    /// Explicit runner work directory; derived from `branch_path` when
    /// absent.
    #[serde(default)]
    pub dir_option: Option<String>,
    /// Simulator context directory name (e.g. `"mtu-vcs"`); derived from
    /// `branch_path` when absent.
    #[serde(default)]
    pub vcs_context: Option<String>,
    /// Extra arguments for the elaboration phase.
    #[serde(default)]
    pub elab_opts: Option<String>,
    /// Extra arguments for the analysis phase.
    #[serde(default)]
    pub vlogan_opts: Option<String>,
    /// Extra arguments for the run phase.
    #[serde(default)]
    pub run_opts: Option<String>,
}

/// Response to a rerun submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerunResponse {
    pub status: String,
    pub message: String,
    pub job_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_id_parse_roundtrip() {
        let case = CaseId::parse("SimplePingTest_seed123").unwrap();
        assert_eq!(case.base_name, "SimplePingTest");
        assert_eq!(case.seed, 123);
        assert_eq!(case.to_string(), "SimplePingTest_seed123");
    }

    #[test]
    fn test_case_id_splits_on_last_seed_token() {
        let case = CaseId::parse("dma_seed_sweep_seed42").unwrap();
        assert_eq!(case.base_name, "dma_seed_sweep");
        assert_eq!(case.seed, 42);
    }

    #[test]
    fn test_case_id_rejects_malformed_ids() {
        assert!(CaseId::parse("no_marker").is_none());
        assert!(CaseId::parse("test_seedXYZ").is_none());
        assert!(CaseId::parse("_seed12").is_none());
        assert!(CaseId::parse("test_seed").is_none());
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in [
            JobStatus::Queued,
            JobStatus::PullingUpdates,
            JobStatus::PreparingConfig,
            JobStatus::ConfigPrepared,
            JobStatus::RunningSimulation,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states_accept_no_transition() {
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_transitions_are_monotonic() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::PreparingConfig));
        assert!(JobStatus::PreparingConfig.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::RunningSimulation.can_transition_to(JobStatus::RunningSimulation));
        assert!(!JobStatus::RunningSimulation.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Initializing.can_transition_to(JobStatus::RunningSimulation));
    }

    #[test]
    fn test_rerun_request_wire_format() {
        let req: RerunRequest = serde_json::from_str(
            r#"{
                "selectedCases": ["t1_seed1"],
                "branchPath": "work/area/mtu-vcs",
                "rebuildCases": true,
                "simTimeHours": 2
            }"#,
        )
        .unwrap();
        assert_eq!(req.selected_cases, vec!["t1_seed1"]);
        assert!(req.rebuild_cases);
        assert!(!req.include_waveform);
        assert_eq!(req.sim_time_hours, 2);
        assert!(req.dir_option.is_none());
    }

    #[test]
    fn test_result_wire_format_keeps_legacy_log_path_key() {
        let result = TestResult {
            id: "t1_seed1".to_string(),
            status: Verdict::Failed,
            error_hint: "failed (from summary artifact)".to_string(),
            display_log_path: "work/area/mtu-vcs/sim/t1_seed1/latest/run.log".to_string(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "FAILED");
        assert!(json.get("new_log_path").is_some());
        assert!(json.get("display_log_path").is_none());
    }

    #[test]
    fn test_not_found_snapshot_serializes_sentinel_status() {
        let json = serde_json::to_value(JobSnapshot::not_found()).unwrap();
        assert_eq!(json["status"], "not_found");
        assert!(json.get("job_id").is_none());
    }
}
