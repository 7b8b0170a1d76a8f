//! Evaluator stage: judge a variant's profile against the baseline's.

use crate::parse::verdict::{
    comparison_summary, confidence_score, improvement_percentage, missing_keys, parse_evaluation,
    Verdict,
};
use crate::prompts::{load_template, PromptKind};
use perfforge_core::config::EvaluatorConfig;
use perfforge_core::{PipelineError, Stage, StageFailure, StageRecord, StageResult};
use perfforge_llm::{Inference, PromptTemplate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const STAGE_NAME: &str = "evaluator";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EvaluatorInput {
    original_profiler_output_path: Option<PathBuf>,
    variant_profiler_output_path: Option<PathBuf>,
    threshold: Option<u32>,
}

#[derive(Debug, Default, Serialize)]
pub struct EvaluatorOutput {
    /// The parsed `evaluation` mapping, or `{raw_llm_response}` when the
    /// response could not be parsed.
    pub evaluation_results: Option<Map<String, Value>>,
    /// Classified `is_improvement`.
    pub evaluation_verdict: Verdict,
    /// Estimated speedup in percent, when the model gave a number.
    pub improvement_percentage: Option<f64>,
    pub confidence_score: Option<f64>,
    pub comparison_summary: Option<String>,
    /// Lists expected keys the evaluation left out.
    pub evaluator_warning: Option<String>,
}

pub struct Evaluator {
    config: EvaluatorConfig,
    prompt_dir: Option<PathBuf>,
    inference: Arc<dyn Inference>,
    template: Option<PromptTemplate>,
}

struct ProfileSide {
    report: String,
    source_code: Option<String>,
}

fn load_side(path: Option<&Path>, field: &str) -> Result<ProfileSide, PipelineError> {
    let path = path.ok_or_else(|| PipelineError::input(format!("missing '{field}'")))?;
    let record = StageRecord::load(path)?;
    let report = record
        .get_str("perf_report_output")
        .ok_or_else(|| {
            PipelineError::input(format!("'perf_report_output' missing in {}", path.display()))
        })?
        .to_string();
    Ok(ProfileSide {
        report,
        source_code: record.get_str("source_code").map(str::to_string),
    })
}

/// Optional source listing appended to the comparison prompt.
fn source_context(original: Option<&str>, variant: Option<&str>) -> String {
    let block = |label: &str, code: &str| {
        format!("Here is the source code for the {label} version:\n```cpp\n{code}\n```\n")
    };
    match (original, variant) {
        (Some(o), Some(v)) => format!(
            "\nFor additional context:\n\n{}\n{}",
            block("ORIGINAL", o),
            block("VARIANT", v)
        ),
        (Some(o), None) => format!("\nFor additional context:\n\n{}", block("ORIGINAL", o)),
        (None, Some(v)) => format!("\nFor additional context:\n\n{}", block("VARIANT", v)),
        (None, None) => String::new(),
    }
}

impl Evaluator {
    pub fn new(
        config: EvaluatorConfig,
        prompt_dir: Option<PathBuf>,
        inference: Arc<dyn Inference>,
    ) -> Self {
        Self {
            config,
            prompt_dir,
            inference,
            template: None,
        }
    }
}

impl Stage for Evaluator {
    type Output = EvaluatorOutput;

    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn configure(&mut self) -> Result<(), PipelineError> {
        self.template = Some(load_template(PromptKind::Evaluator, self.prompt_dir.as_deref())?);
        Ok(())
    }

    fn run(&self, input: &StageRecord) -> StageResult<EvaluatorOutput> {
        let template = self
            .template
            .as_ref()
            .ok_or_else(|| PipelineError::config("evaluator used before configure()"))?;
        let input: EvaluatorInput = input.decode()?;
        let original = load_side(
            input.original_profiler_output_path.as_deref(),
            "original_profiler_output_path",
        )?;
        let variant = load_side(
            input.variant_profiler_output_path.as_deref(),
            "variant_profiler_output_path",
        )?;

        let threshold = input.threshold.unwrap_or(self.config.threshold).to_string();
        let context = source_context(original.source_code.as_deref(), variant.source_code.as_deref());
        let prompt = template.render(
            STAGE_NAME,
            &[
                ("original_perf_report", &original.report),
                ("variant_perf_report", &variant.report),
                ("source_code_context_section", &context),
                ("threshold", &threshold),
            ],
        );
        let response = self.inference.infer(&prompt).map_err(PipelineError::from)?;

        let evaluation = match parse_evaluation(&response) {
            Ok(evaluation) => evaluation,
            Err(error) => {
                let mut raw = Map::new();
                raw.insert("raw_llm_response".into(), Value::String(response));
                return Err(StageFailure::new(
                    EvaluatorOutput {
                        evaluation_results: Some(raw),
                        ..EvaluatorOutput::default()
                    },
                    error,
                ));
            }
        };

        let missing = missing_keys(&evaluation);
        let evaluator_warning = if missing.is_empty() {
            None
        } else {
            warn!(?missing, "evaluation is missing expected keys");
            Some(format!("evaluation missing keys: {}", missing.join(", ")))
        };
        let verdict = evaluation
            .get("is_improvement")
            .map(Verdict::classify)
            .unwrap_or_default();
        let percentage = improvement_percentage(&evaluation);
        info!(verdict = ?verdict, improvement_percentage = ?percentage, "variant evaluated");

        Ok(EvaluatorOutput {
            evaluation_verdict: verdict,
            improvement_percentage: percentage,
            confidence_score: confidence_score(&evaluation),
            comparison_summary: comparison_summary(&evaluation),
            evaluator_warning,
            evaluation_results: Some(evaluation),
        })
    }
}
