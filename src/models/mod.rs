//! Domain models for the Simulation Rerun Server.

pub mod job;

// Re-export commonly used types
pub use job::{
    CaseId, Job, JobSnapshot, JobStatus, ProgressSummary, RerunRequest, RerunResponse, TestResult,
    Verdict,
};
