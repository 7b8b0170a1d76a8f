//! Prompt templates for the inference-backed stages.
//!
//! Built-in templates are compiled in; a `prompt_dir` holding files of the
//! same name overrides them.

use perfforge_core::PipelineError;
use perfforge_llm::PromptTemplate;
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Analyzer,
    Replicator,
    Evaluator,
}

impl PromptKind {
    pub fn key(self) -> &'static str {
        match self {
            PromptKind::Analyzer => "analyzer",
            PromptKind::Replicator => "replicator",
            PromptKind::Evaluator => "evaluator",
        }
    }

    pub fn file_name(self) -> String {
        format!("{}.yaml", self.key())
    }

    fn builtin(self) -> &'static str {
        match self {
            PromptKind::Analyzer => include_str!("../prompts/analyzer.yaml"),
            PromptKind::Replicator => include_str!("../prompts/replicator.yaml"),
            PromptKind::Evaluator => include_str!("../prompts/evaluator.yaml"),
        }
    }

    /// Placeholders the stage fills; a template lacking one is rejected.
    pub fn placeholders(self) -> &'static [&'static str] {
        match self {
            PromptKind::Analyzer => &[
                "source_code",
                "perf_command",
                "perf_report_output",
                "threshold",
                "context",
            ],
            PromptKind::Replicator => &[
                "source_code",
                "bottleneck_location",
                "bottleneck_type",
                "analysis_hypothesis",
            ],
            PromptKind::Evaluator => &[
                "original_perf_report",
                "variant_perf_report",
                "source_code_context_section",
                "threshold",
            ],
        }
    }
}

/// Load and validate the template for `kind`.
pub fn load_template(
    kind: PromptKind,
    prompt_dir: Option<&Path>,
) -> Result<PromptTemplate, PipelineError> {
    let (text, origin) = match prompt_dir {
        Some(dir) => {
            let path = dir.join(kind.file_name());
            let text = std::fs::read_to_string(&path).map_err(|e| {
                PipelineError::config(format!("prompt file {}: {e}", path.display()))
            })?;
            (text, path.display().to_string())
        }
        None => (kind.builtin().to_string(), format!("built-in {}", kind.file_name())),
    };
    let template = parse_template(kind, &text, &origin)?;
    debug!(prompt = kind.key(), origin = %origin, "loaded prompt template");
    Ok(template)
}

fn parse_template(
    kind: PromptKind,
    text: &str,
    origin: &str,
) -> Result<PromptTemplate, PipelineError> {
    let doc: Mapping = serde_yaml::from_str(text)
        .map_err(|e| PipelineError::config(format!("{origin}: invalid YAML: {e}")))?;
    let section = doc
        .get(Value::String(kind.key().to_string()))
        .cloned()
        .ok_or_else(|| {
            PipelineError::config(format!("{origin}: missing '{}' top-level key", kind.key()))
        })?;
    let template: PromptTemplate = serde_yaml::from_value(section).map_err(|e| {
        PipelineError::config(format!("{origin}: '{}' needs system and user: {e}", kind.key()))
    })?;

    let missing = template.missing_placeholders(kind.placeholders());
    if !missing.is_empty() {
        return Err(PipelineError::config(format!(
            "{origin}: template lacks placeholders {missing:?}"
        )));
    }
    Ok(template)
}
