//! Replicator stage: turn a bottleneck analysis into candidate rewrites.

use crate::parse::analysis::{is_parsed, parse_analysis};
use crate::parse::variants::{parse_variants, Variant};
use crate::prompts::{load_template, PromptKind};
use perfforge_core::config::ReplicatorConfig;
use perfforge_core::{PipelineError, Stage, StageRecord, StageResult};
use perfforge_llm::{Inference, PromptTemplate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub const STAGE_NAME: &str = "replicator";
pub const DEFAULT_BOTTLENECK_TYPE: &str = "General Performance Bottleneck";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplicatorInput {
    source_code: Option<String>,
    bottleneck_location: Option<String>,
    bottleneck_type: Option<String>,
    analysis_hypothesis: Option<String>,
    performance_analysis: Option<String>,
    max_variants: Option<usize>,
}

#[derive(Debug, Default, Serialize)]
pub struct ReplicatorOutput {
    /// Strategy paragraph, or the whole response when no variant parsed.
    pub proposed_fix_strategy: String,
    /// Parsed rewrites with unique ids, capped at `max_variants`.
    pub modified_code_variants: Vec<Variant>,
    /// Set when the response contained no usable variant.
    pub replicator_warning: Option<String>,
}

pub struct Replicator {
    config: ReplicatorConfig,
    prompt_dir: Option<PathBuf>,
    inference: Arc<dyn Inference>,
    template: Option<PromptTemplate>,
}

impl Replicator {
    pub fn new(
        config: ReplicatorConfig,
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

fn parsed(value: Option<String>) -> Option<String> {
    value.filter(|v| is_parsed(v))
}

impl Stage for Replicator {
    type Output = ReplicatorOutput;

    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    fn configure(&mut self) -> Result<(), PipelineError> {
        self.template = Some(load_template(PromptKind::Replicator, self.prompt_dir.as_deref())?);
        Ok(())
    }

    fn run(&self, input: &StageRecord) -> StageResult<ReplicatorOutput> {
        let template = self
            .template
            .as_ref()
            .ok_or_else(|| PipelineError::config("replicator used before configure()"))?;
        let input: ReplicatorInput = input.decode()?;

        let mut location = parsed(input.bottleneck_location);
        let mut bottleneck_type = parsed(input.bottleneck_type);
        let mut hypothesis = parsed(input.analysis_hypothesis);
        if location.is_none() || bottleneck_type.is_none() || hypothesis.is_none() {
            if let Some(analysis) = input.performance_analysis.as_deref() {
                let fields = parse_analysis(analysis);
                location = location.or_else(|| parsed(Some(fields.location)));
                bottleneck_type = bottleneck_type.or_else(|| parsed(Some(fields.bottleneck_type)));
                hypothesis = hypothesis.or_else(|| parsed(Some(fields.hypothesis)));
            }
        }
        let bottleneck_type = bottleneck_type.unwrap_or_else(|| DEFAULT_BOTTLENECK_TYPE.into());
        let source_code = input.source_code.filter(|s| !s.trim().is_empty());

        let (source_code, location, hypothesis) = match (source_code, location, hypothesis) {
            (Some(s), Some(l), Some(h)) => (s, l, h),
            (s, l, h) => {
                let missing: Vec<&str> = [
                    ("source_code", s.is_none()),
                    ("bottleneck_location", l.is_none()),
                    ("analysis_hypothesis", h.is_none()),
                ]
                .iter()
                .filter(|(_, absent)| *absent)
                .map(|(name, _)| *name)
                .collect();
                return Err(PipelineError::input(format!(
                    "missing required fields: {}",
                    missing.join(", ")
                ))
                .into());
            }
        };

        let prompt = template.render(
            STAGE_NAME,
            &[
                ("source_code", &source_code),
                ("bottleneck_location", &location),
                ("bottleneck_type", &bottleneck_type),
                ("analysis_hypothesis", &hypothesis),
            ],
        );
        let response = self.inference.infer(&prompt).map_err(PipelineError::from)?;

        let max_variants = input.max_variants.unwrap_or(self.config.max_variants).max(1);
        let parsed = parse_variants(&response, max_variants);
        if parsed.variants.is_empty() {
            warn!("no variants in replicator response");
            return Ok(ReplicatorOutput {
                proposed_fix_strategy: response,
                modified_code_variants: Vec::new(),
                replicator_warning: Some(
                    "could not parse variants from model output; raw output kept as strategy"
                        .into(),
                ),
            });
        }

        info!(variants = parsed.variants.len(), "variants parsed");
        Ok(ReplicatorOutput {
            proposed_fix_strategy: parsed.strategy,
            modified_code_variants: parsed.variants,
            replicator_warning: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfforge_llm::{InferenceError, Prompt};
    use std::cell::RefCell;

    struct Canned {
        reply: String,
        seen: RefCell<Vec<Prompt>>,
    }

    impl Inference for Canned {
        fn infer(&self, prompt: &Prompt) -> Result<String, InferenceError> {
            self.seen.borrow_mut().push(prompt.clone());
            Ok(self.reply.clone())
        }
    }

    fn replicator(reply: &str) -> (Replicator, Arc<Canned>) {
        let canned = Arc::new(Canned {
            reply: reply.into(),
            seen: RefCell::new(Vec::new()),
        });
        let mut stage = Replicator::new(ReplicatorConfig::default(), None, canned.clone());
        stage.configure().unwrap();
        (stage, canned)
    }

    const REPLY: &str = "Proposed Fix Strategy: unroll.\n\n### Variant 1\nUnrolled.\n```cpp\nint a;\n```\n### Variant 2\nVectorized.\n```cpp\nint b;\n```\n";

    #[test]
    fn test_variants_from_explicit_fields() {
        let (stage, canned) = replicator(REPLY);
        let out = stage.execute(
            StageRecord::new()
                .with("source_code", "int x;")
                .with("bottleneck_location", "main")
                .with("bottleneck_type", "CPU")
                .with("analysis_hypothesis", "loop"),
        );
        assert!(out.error(STAGE_NAME).is_none());
        assert_eq!(out.get_str("proposed_fix_strategy"), Some("unroll."));
        let variants = out.get("modified_code_variants").unwrap().as_array().unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[1]["variant_id"], "Variant 2");
        assert!(out.get("replicator_warning").unwrap().is_null());
        assert!(canned.seen.borrow()[0].user.contains("Bottleneck type: CPU"));
    }

    #[test]
    fn test_fields_rederived_from_analysis_with_default_type() {
        let (stage, canned) = replicator(REPLY);
        let out = stage.execute(
            StageRecord::new()
                .with("source_code", "int x;")
                .with("bottleneck_location", "Not parsed")
                .with(
                    "performance_analysis",
                    "- **Location:** kernel()\n- **Likely Cause:** aliasing",
                ),
        );
        assert!(out.error(STAGE_NAME).is_none());
        let user = canned.seen.borrow()[0].user.clone();
        assert!(user.contains("Bottleneck location: kernel()"));
        assert!(user.contains("Bottleneck type: General Performance Bottleneck"));
        assert!(user.contains("Hypothesis: aliasing"));
    }

    #[test]
    fn test_missing_fields_error() {
        let (stage, canned) = replicator(REPLY);
        let out = stage.execute(StageRecord::new().with("source_code", "int x;"));
        let err = out.error(STAGE_NAME).unwrap();
        assert!(err.contains("bottleneck_location"));
        assert!(err.contains("analysis_hypothesis"));
        assert!(canned.seen.borrow().is_empty());
        assert_eq!(
            out.get("modified_code_variants"),
            Some(&serde_json::json!([]))
        );
    }

    #[test]
    fn test_zero_variants_keeps_raw_text() {
        let (stage, _) = replicator("Sorry, no idea.");
        let out = stage.execute(
            StageRecord::new()
                .with("source_code", "int x;")
                .with("bottleneck_location", "main")
                .with("analysis_hypothesis", "loop"),
        );
        assert!(out.error(STAGE_NAME).is_none());
        assert_eq!(out.get_str("proposed_fix_strategy"), Some("Sorry, no idea."));
        assert!(out.get_str("replicator_warning").is_some());
    }
}
