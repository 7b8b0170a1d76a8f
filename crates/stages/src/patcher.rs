//! Patcher stage: materialize each variant as a source file on disk.

use perfforge_core::sanitize::{sanitize_file_name, sanitize_variant_id};
use perfforge_core::{PipelineError, Stage, StageRecord, StageResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const STAGE_NAME: &str = "patcher";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchResult {
    /// Id from the replicator, or `entry N` when the entry had none.
    pub variant_id: String,
    /// Where the variant was written; `None` on failure.
    pub patched_file_path: Option<String>,
    pub status: PatchStatus,
    /// Why this variant could not be written.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchAggregate {
    AllSuccess,
    PartialSuccess,
    #[default]
    AllFailed,
}

impl PatchAggregate {
    /// Derived from counts only; an empty batch is `AllFailed`.
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        match (succeeded, failed) {
            (s, 0) if s > 0 => PatchAggregate::AllSuccess,
            (s, f) if s > 0 && f > 0 => PatchAggregate::PartialSuccess,
            _ => PatchAggregate::AllFailed,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PatcherInput {
    /// Decoded per entry so one malformed variant cannot sink the batch.
    modified_code_variants: Vec<Value>,
    original_file_name: Option<String>,
    patch_output_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize)]
pub struct PatcherOutput {
    /// One result per input entry, in input order.
    pub patch_results: Vec<PatchResult>,
    /// Aggregate derived from the two counts below.
    pub patcher_status: PatchAggregate,
    pub patched_variant_count: usize,
    pub failed_variant_count: usize,
}

#[derive(Debug, Default)]
pub struct Patcher;

impl Patcher {
    pub fn new() -> Self {
        Self
    }

    fn patch_one(
        variant_id: Option<&str>,
        code: Option<&str>,
        file_name: &str,
        output_dir: &Path,
        used: &mut HashSet<String>,
    ) -> Result<PathBuf, String> {
        let variant_id = variant_id
            .filter(|id| !id.trim().is_empty())
            .ok_or("variant has no 'variant_id'")?;
        let code = code.ok_or("variant has no 'code'")?;
        if code.trim().is_empty() {
            return Err("variant has no code".into());
        }
        let dir_name = sanitize_variant_id(variant_id);
        if !used.insert(dir_name.clone()) {
            return Err(format!("variant directory '{dir_name}' already used in this batch"));
        }
        let dir = output_dir.join(&dir_name);
        std::fs::create_dir_all(&dir).map_err(|e| format!("create {}: {e}", dir.display()))?;
        let path = dir.join(file_name);
        std::fs::write(&path, code).map_err(|e| format!("write {}: {e}", path.display()))?;
        Ok(path)
    }
}

impl Stage for Patcher {
    type Output = PatcherOutput;

    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn configure(&mut self) -> Result<(), PipelineError> {
        Ok(())
    }

    fn run(&self, input: &StageRecord) -> StageResult<PatcherOutput> {
        let input: PatcherInput = input.decode()?;
        let file_name = input
            .original_file_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .map(sanitize_file_name)
            .ok_or_else(|| PipelineError::input("missing 'original_file_name'"))?;
        let output_dir = input
            .patch_output_dir
            .ok_or_else(|| PipelineError::input("missing 'patch_output_dir'"))?;

        let mut used = HashSet::new();
        let mut output = PatcherOutput::default();
        for (index, entry) in input.modified_code_variants.iter().enumerate() {
            let variant_id = entry.get("variant_id").and_then(Value::as_str);
            let code = entry.get("code").and_then(Value::as_str);
            let label = variant_id
                .filter(|id| !id.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("entry {}", index + 1));
            let result = match Self::patch_one(variant_id, code, &file_name, &output_dir, &mut used) {
                Ok(path) => {
                    info!(variant = %label, path = %path.display(), "patched");
                    output.patched_variant_count += 1;
                    PatchResult {
                        variant_id: label,
                        patched_file_path: Some(path.display().to_string()),
                        status: PatchStatus::Success,
                        error: None,
                    }
                }
                Err(error) => {
                    warn!(variant = %label, error = %error, "patch failed");
                    output.failed_variant_count += 1;
                    PatchResult {
                        variant_id: label,
                        patched_file_path: None,
                        status: PatchStatus::Failed,
                        error: Some(error),
                    }
                }
            };
            output.patch_results.push(result);
        }
        output.patcher_status =
            PatchAggregate::from_counts(output.patched_variant_count, output.failed_variant_count);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn variant(id: &str, code: &str) -> serde_json::Value {
        json!({"variant_id": id, "explanation": "e", "code": code})
    }

    #[test]
    fn test_aggregate_from_counts() {
        assert_eq!(PatchAggregate::from_counts(3, 0), PatchAggregate::AllSuccess);
        assert_eq!(PatchAggregate::from_counts(2, 1), PatchAggregate::PartialSuccess);
        assert_eq!(PatchAggregate::from_counts(0, 2), PatchAggregate::AllFailed);
        assert_eq!(PatchAggregate::from_counts(0, 0), PatchAggregate::AllFailed);
    }

    #[test]
    fn test_writes_sanitized_paths_and_passes_fields_through() {
        let dir = tempfile::tempdir().unwrap();
        let out = Patcher::new().execute(
            StageRecord::new()
                .with("original_file_name", "hot loop.cpp")
                .with("patch_output_dir", dir.path().display().to_string())
                .with("upstream_field", "kept")
                .with(
                    "modified_code_variants",
                    json!([variant("Variant 1", "int a;"), variant("../evil", "int b;"), variant("Variant 3", "  ")]),
                ),
        );
        assert!(out.error(STAGE_NAME).is_none());
        assert_eq!(out.get_str("upstream_field"), Some("kept"));
        assert_eq!(out.get_str("patcher_status"), Some("partial_success"));
        assert_eq!(out.get("patched_variant_count"), Some(&json!(2)));
        assert_eq!(out.get("failed_variant_count"), Some(&json!(1)));

        let written = dir.path().join("Variant_1").join("hot_loop.cpp");
        assert_eq!(std::fs::read_to_string(&written).unwrap(), "int a;");
        assert!(dir.path().join("..evil").join("hot_loop.cpp").is_file());
    }

    #[test]
    fn test_malformed_entries_fail_alone() {
        let dir = tempfile::tempdir().unwrap();
        let out = Patcher::new().execute(
            StageRecord::new()
                .with("original_file_name", "a.cpp")
                .with("patch_output_dir", dir.path().display().to_string())
                .with(
                    "modified_code_variants",
                    json!([
                        {"variant_id": "Variant 1", "explanation": "e"},
                        {"explanation": "e", "code": "int b;"},
                        variant("Variant 3", "int c;"),
                        "not a variant",
                    ]),
                ),
        );
        assert!(out.error(STAGE_NAME).is_none());
        assert_eq!(out.get_str("patcher_status"), Some("partial_success"));
        assert_eq!(out.get("patched_variant_count"), Some(&json!(1)));
        assert_eq!(out.get("failed_variant_count"), Some(&json!(3)));

        let results: Vec<PatchResult> =
            serde_json::from_value(out.get("patch_results").unwrap().clone()).unwrap();
        assert_eq!(results[0].variant_id, "Variant 1");
        assert!(results[0].error.as_deref().unwrap().contains("'code'"));
        assert_eq!(results[1].variant_id, "entry 2");
        assert!(results[1].error.as_deref().unwrap().contains("'variant_id'"));
        assert_eq!(results[2].status, PatchStatus::Success);
        assert_eq!(results[3].status, PatchStatus::Failed);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("Variant_3").join("a.cpp")).unwrap(),
            "int c;"
        );
    }

    #[test]
    fn test_write_failure_is_per_variant() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the variant directory should go.
        std::fs::write(dir.path().join("Variant_1"), "blocker").unwrap();
        let out = Patcher::new().execute(
            StageRecord::new()
                .with("original_file_name", "a.cpp")
                .with("patch_output_dir", dir.path().display().to_string())
                .with(
                    "modified_code_variants",
                    json!([variant("Variant 1", "int a;"), variant("Variant 2", "int b;")]),
                ),
        );
        assert_eq!(out.get_str("patcher_status"), Some("partial_success"));
        let results: Vec<PatchResult> =
            serde_json::from_value(out.get("patch_results").unwrap().clone()).unwrap();
        assert_eq!(results[0].status, PatchStatus::Failed);
        assert!(results[0].patched_file_path.is_none());
        assert!(results[0].error.as_deref().unwrap().contains("create"));
        assert!(dir.path().join("Variant_2").join("a.cpp").is_file());
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let record = StageRecord::new()
            .with("original_file_name", "a.cpp")
            .with("patch_output_dir", dir.path().display().to_string())
            .with("modified_code_variants", json!([variant("Variant 1", "int a;")]));
        let first = Patcher::new().execute(record.clone());
        let second = Patcher::new().execute(record);
        assert_eq!(first, second);
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_empty_batch_is_all_failed() {
        let dir = tempfile::tempdir().unwrap();
        let out = Patcher::new().execute(
            StageRecord::new()
                .with("original_file_name", "a.cpp")
                .with("patch_output_dir", dir.path().display().to_string()),
        );
        assert_eq!(out.get_str("patcher_status"), Some("all_failed"));
    }

    #[test]
    fn test_missing_file_name_is_error() {
        let out = Patcher::new().execute(StageRecord::new().with("patch_output_dir", "/tmp/x"));
        assert!(out.error(STAGE_NAME).unwrap().contains("original_file_name"));
    }
}
