//! Rerun configuration document preparation.
//!
//! Copies the per-component template document, rewrites its `tests` section
//! to exactly the selected cases (with the requested seed injected into the
//! run options), and replaces the `"rerun"` regression group with the
//! selection. The runner is then invoked against the rewritten document.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::error::JobError;
use crate::models::CaseId;

/// Launch-option token carrying the randomization seed; any existing token
/// is stripped before the selected seed is appended.
pub const SEED_OPT_PREFIX: &str = "+ntb_random_seed=";

/// Name of the regression group driven by reruns.
pub const RERUN_GROUP: &str = "rerun";

/// Produces the configuration document consumed by the external runner.
pub trait ConfigPreparer: Send + Sync {
    /// Prepare the rerun document for `component`, covering every entry of
    /// `selected_cases` that belongs to that component. Returns the path of
    /// the written document.
    fn prepare(&self, component: &str, selected_cases: &[String]) -> Result<PathBuf, JobError>;
}

/// Filesystem-backed preparer working under the project root.
///
/// Template location: `<root>/dv/sim_ctrl/ts/<component>.json`.
/// Output location: `<root>/dv/sim_ctrl/ts/temp/rerun.json`.
pub struct FsConfigPreparer {
    project_root: Option<PathBuf>,
}

impl FsConfigPreparer {
    pub fn new(project_root: Option<PathBuf>) -> Self {
        FsConfigPreparer { project_root }
    }
}

impl ConfigPreparer for FsConfigPreparer {
    fn prepare(&self, component: &str, selected_cases: &[String]) -> Result<PathBuf, JobError> {
        let root = self.project_root.as_deref().ok_or_else(|| {
            JobError::Configuration(
                "PRJ_ICDIR is not set; cannot locate the component template document".to_string(),
            )
        })?;

        let template_path = root
            .join("dv")
            .join("sim_ctrl")
            .join("ts")
            .join(format!("{component}.json"));
        if !template_path.exists() {
            return Err(JobError::TemplateArtifactNotFound(template_path));
        }

        let target_dir = root.join("dv").join("sim_ctrl").join("ts").join("temp");
        fs::create_dir_all(&target_dir)?;
        let target_path = target_dir.join("rerun.json");

        let content = fs::read_to_string(&template_path)?;
        let mut document: Value = serde_json::from_str(&content)?;

        let templates = test_templates(&document);

        let selected_for_component: Vec<&String> = selected_cases
            .iter()
            .filter(|case_id| case_id.starts_with(&format!("{component}_")))
            .collect();
        if selected_for_component.is_empty() {
            info!("No cases selected for component '{component}'; tests section will be empty");
        }

        let mut rerun_tests = Vec::new();
        let mut rerun_members = Vec::new();
        for case_id in selected_for_component {
            let Some(case) = CaseId::parse(case_id) else {
                warn!("Cannot parse base name and seed from '{case_id}'; skipping case");
                continue;
            };

            let mut test_def = match templates.get(&case.base_name) {
                Some(template) => template.clone(),
                None => {
                    warn!(
                        "No template definition for base test '{}'; using a minimal one",
                        case.base_name
                    );
                    json!({
                        "uvm_test_seq": format!("unknown_vseq_for_{}", case.base_name),
                        "build_mode": format!("unknown_build_mode_for_{}", case.base_name),
                    })
                }
            };

            let Some(def) = test_def.as_object_mut() else {
                warn!("Template definition for '{}' is not an object; skipping case", case.base_name);
                continue;
            };
            def.insert("name".to_string(), json!(case_id));
            // The seed rides in the run options, not in a dedicated field.
            def.remove("seed");

            let mut run_opts: Vec<Value> = def
                .get("run_opts")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|opt| {
                    !opt.as_str()
                        .is_some_and(|s| s.starts_with(SEED_OPT_PREFIX))
                })
                .collect();
            run_opts.push(json!(format!("{SEED_OPT_PREFIX}{}", case.seed)));
            def.insert("run_opts".to_string(), Value::Array(run_opts));

            rerun_tests.push(test_def);
            rerun_members.push(json!(case_id));
        }

        let doc = document
            .as_object_mut()
            .ok_or_else(|| JobError::Document("template root is not an object".to_string()))?;
        doc.insert("tests".to_string(), Value::Array(rerun_tests));
        upsert_rerun_group(doc, rerun_members);

        fs::write(&target_path, serde_json::to_string_pretty(&document)?)?;
        info!(
            "Prepared rerun configuration for '{component}' at {}",
            target_path.display()
        );
        Ok(target_path)
    }
}

/// Collect base-name → definition templates from the document's `tests`
/// section, tolerating both the list-of-objects and name-keyed-map forms.
fn test_templates(document: &Value) -> Map<String, Value> {
    let mut templates = Map::new();
    match document.get("tests") {
        Some(Value::Array(entries)) => {
            for entry in entries {
                if let Some(name) = entry.get("name").and_then(Value::as_str) {
                    templates.insert(name.to_string(), entry.clone());
                } else {
                    warn!("Malformed entry in template 'tests' list; skipping");
                }
            }
        }
        Some(Value::Object(entries)) => {
            for (name, entry) in entries {
                if entry.is_object() {
                    templates.insert(name.clone(), entry.clone());
                } else {
                    warn!("Malformed entry in template 'tests' map for '{name}'; skipping");
                }
            }
        }
        _ => {
            warn!("Template 'tests' section is neither list nor map; no base definitions");
        }
    }
    templates
}

/// Replace the regression group named `rerun`, or append it, preserving all
/// other groups.
fn upsert_rerun_group(doc: &mut Map<String, Value>, members: Vec<Value>) {
    let group = json!({ "name": RERUN_GROUP, "tests": members });

    match doc.get_mut("regressions") {
        Some(Value::Array(groups)) => {
            let existing = groups.iter_mut().find(|g| {
                g.get("name").and_then(Value::as_str) == Some(RERUN_GROUP)
            });
            match existing {
                Some(slot) => *slot = group,
                None => groups.push(group),
            }
        }
        _ => {
            warn!("'regressions' section missing or not a list; initializing it");
            doc.insert("regressions".to_string(), Value::Array(vec![group]));
        }
    }
}
