//! Report reconciliation: rewriting rerun outcomes into the persisted
//! interactive report.
//!
//! Strictly best-effort - every failure here is logged and swallowed by the
//! driver, never affecting the job's own status.

use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::models::{CaseId, TestResult};

/// Report mutation failures. Non-fatal by contract.
#[derive(Debug, thiserror::Error)]
pub enum ReportMutationError {
    #[error("Failed to read or write report document: {0}")]
    Io(#[from] std::io::Error),
}

/// Applies resolved rerun verdicts to the persisted report artifact.
pub trait ReportReconciler: Send + Sync {
    fn apply(&self, results: &[TestResult]) -> Result<(), ReportMutationError>;
}

/// No-op reconciler used when no report document is configured.
pub struct NullReconciler;

impl ReportReconciler for NullReconciler {
    fn apply(&self, _results: &[TestResult]) -> Result<(), ReportMutationError> {
        Ok(())
    }
}

static DATA_STATUS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-status="[^"]*""#).expect("data-status regex is valid"));
static STATUS_CELL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(<td[^>]*class="[^"]*status[^"]*"[^>]*>)[^<]*(</td>)"#)
        .expect("status cell regex is valid")
});
static LOG_HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="[^"]*""#).expect("href regex is valid"));

/// Rewrites matching rows of the legacy HTML report in place.
///
/// The report generator emits one `<tr>` per line. A row belongs to a case
/// when it carries a `data-case-id="<case id>"` attribute or contains the
/// visible text `"<base name> (Seed: <seed>)"`. Matching rows get their
/// status attribute, status cell text and log href rewritten; every other
/// row is preserved byte-for-byte. Persistence is a full-document rewrite.
pub struct HtmlReportReconciler {
    report_file: PathBuf,
}

impl HtmlReportReconciler {
    pub fn new(report_file: PathBuf) -> Self {
        HtmlReportReconciler { report_file }
    }

    fn rewrite_row(line: &str, result: &TestResult) -> String {
        let status_lower = result.status.as_str().to_lowercase();
        let mut rewritten = DATA_STATUS_RE
            .replace(line, format!(r#"data-status="{status_lower}""#))
            .into_owned();
        rewritten = STATUS_CELL_RE
            .replace(&rewritten, |caps: &regex::Captures<'_>| {
                format!("{}{}{}", &caps[1], result.status, &caps[2])
            })
            .into_owned();
        rewritten = LOG_HREF_RE
            .replace(&rewritten, format!(r#"href="{}""#, result.display_log_path))
            .into_owned();
        rewritten
    }
}

impl ReportReconciler for HtmlReportReconciler {
    fn apply(&self, results: &[TestResult]) -> Result<(), ReportMutationError> {
        let content = fs::read_to_string(&self.report_file)?;

        let mut rewritten_rows = 0usize;
        let ends_with_newline = content.ends_with('\n');
        let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

        for result in results {
            let attr_needle = format!(r#"data-case-id="{}""#, result.id);
            let text_needle = CaseId::parse(&result.id)
                .map(|case| format!("{} (Seed: {})", case.base_name, case.seed));

            let row = lines.iter_mut().find(|line| {
                line.contains(&attr_needle)
                    || text_needle.as_ref().is_some_and(|needle| line.contains(needle))
            });

            match row {
                Some(line) => {
                    *line = Self::rewrite_row(line, result);
                    rewritten_rows += 1;
                }
                None => {
                    warn!(
                        "No report row found for case '{}'; leaving report unchanged for it",
                        result.id
                    );
                }
            }
        }

        let mut output = lines.join("\n");
        if ends_with_newline {
            output.push('\n');
        }
        fs::write(&self.report_file, output)?;

        info!(
            "Report reconciliation: rewrote {rewritten_rows}/{} rows in {}",
            results.len(),
            self.report_file.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Verdict;
    use tempfile::TempDir;

    fn result(id: &str, status: Verdict, log: &str) -> TestResult {
        TestResult {
            id: id.to_string(),
            status,
            error_hint: String::new(),
            display_log_path: log.to_string(),
        }
    }

    const REPORT: &str = concat!(
        "<table>\n",
        r#"<tr data-case-id="t1_seed1" data-status="failed"><td>t1 (Seed: 1)</td><td class="status">FAILED</td><td><a href="old/t1/run.log">log</a></td></tr>"#,
        "\n",
        r#"<tr data-status="passed"><td>t2 (Seed: 2)</td><td class="status">PASSED</td><td><a href="old/t2/run.log">log</a></td></tr>"#,
        "\n",
        r#"<tr data-case-id="t3_seed3" data-status="passed"><td>t3 (Seed: 3)</td><td class="status">PASSED</td><td><a href="old/t3/run.log">log</a></td></tr>"#,
        "\n</table>\n",
    );

    #[test]
    fn test_only_matching_rows_are_rewritten() {
        let dir = TempDir::new().unwrap();
        let report_file = dir.path().join("report.html");
        fs::write(&report_file, REPORT).unwrap();

        let reconciler = HtmlReportReconciler::new(report_file.clone());
        reconciler
            .apply(&[
                result("t1_seed1", Verdict::Passed, "new/t1/run.log"),
                // Matched via the "<name> (Seed: <digits>)" text form.
                result("t2_seed2", Verdict::Failed, "new/t2/run.log"),
            ])
            .unwrap();

        let content = fs::read_to_string(&report_file).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert!(lines[1].contains(r#"data-status="passed""#));
        assert!(lines[1].contains(">PASSED</td>"));
        assert!(lines[1].contains(r#"href="new/t1/run.log""#));

        assert!(lines[2].contains(r#"data-status="failed""#));
        assert!(lines[2].contains(">FAILED</td>"));
        assert!(lines[2].contains(r#"href="new/t2/run.log""#));

        // The t3 row was not part of the results and must be untouched.
        assert!(lines[3].contains(r#"href="old/t3/run.log""#));
        assert!(lines[3].contains(">PASSED</td>"));
    }

    #[test]
    fn test_unmatched_case_leaves_document_intact() {
        let dir = TempDir::new().unwrap();
        let report_file = dir.path().join("report.html");
        fs::write(&report_file, REPORT).unwrap();

        HtmlReportReconciler::new(report_file.clone())
            .apply(&[result("ghost_seed9", Verdict::Failed, "x/run.log")])
            .unwrap();

        assert_eq!(fs::read_to_string(&report_file).unwrap(), REPORT);
    }

    #[test]
    fn test_missing_report_file_is_reported_not_panicked() {
        let reconciler = HtmlReportReconciler::new(PathBuf::from("/nonexistent/report.html"));
        let err = reconciler
            .apply(&[result("t1_seed1", Verdict::Passed, "p")])
            .unwrap_err();
        assert!(matches!(err, ReportMutationError::Io(_)));
    }
}
